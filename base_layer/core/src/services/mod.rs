// Copyright 2024. The Keymaster Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! The lifecycle engines of the Keymaster core: deployment, audit, drift classification,
//! selective decommission, bootstrap, key import and account transfer.

pub mod audit;
pub mod bootstrap;
pub mod decommission;
pub mod deployment;
pub mod drift;
pub mod import;
pub mod keygen;
pub mod transfer;

pub use audit::{AuditError, AuditReport, AuditService};
pub use bootstrap::{bootstrap_deployment, BootstrapError, BootstrapService, PendingBootstrap, SweepReport};
pub use decommission::{
    DecommissionError,
    DecommissionOptions,
    DecommissionOutcome,
    DecommissionService,
    RemoteCleanup,
};
pub use deployment::{DeployError, DeployOutcome, DeploymentService};
pub use drift::{analyze_drift, record_drift, DriftAnalysis};
pub use import::{ImportError, ImportOutcome, ImportService};
pub use keygen::{generate_ed25519_keypair, GeneratedKeypair};
pub use transfer::{TransferError, TransferPackage, TransferService};

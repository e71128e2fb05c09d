#![cfg_attr(not(feature = "std"), no_std)]

// 'alloc' is used for dynamic allocation (e.g., Vec<u8> in frames)
extern crate alloc;

// --- Foundation Modules ---
pub mod types;
pub mod shnf;
pub mod sapl;
pub(crate) mod log;

// --- Error Reporting ---
pub mod serr;

// --- Frame Layer ---
pub mod frame;

// --- Object Dictionary ---
pub mod sod;
pub mod sdn;

// --- Network Management ---
pub mod snmt;
pub mod snmts;
pub mod snmtm;

// --- Object Transfer ---
pub mod ssdo;

// --- Configuration Manager ---
pub mod scm;

// --- Cyclic Data ---
pub mod spdo;

// --- Stack Control ---
pub mod ssc;

// --- Instance Container ---
pub mod node;

// --- Top-level Exports ---
pub use frame::{FrameClass, FrameHeader, FrameType};
pub use node::SafetyInstance;
pub use sapl::{ScmApplication, SnApplication};
pub use scm::NodeStatus;
pub use shnf::{SafetyError, Shnf};
pub use snmts::SnState;
pub use sod::{Sod, SodAttr, SodEntry, SodValue};
pub use ssc::ProcessResult;
pub use types::{Sadr, Sdn, Udid};

//! Covenant scripts and transaction builders for agora token offers
//!
//! Offers lock tokens in a P2SH output whose redeem script only releases them
//! to a transaction paying the maker. Partial offers can be accepted in parts,
//! each accept re-creating a smaller covenant; oneshot offers are all or
//! nothing.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::needless_pass_by_ref_mut)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod builder;
pub mod ecc;
pub mod errors;
pub mod hash;
pub mod inputs;
pub mod listing;
pub mod offer;
pub mod oneshot;
pub mod partial;
pub mod script;
pub mod ser;
pub mod token;
pub mod tx;

pub use errors::CovenantError;
pub use offer::{AgoraOffer, AgoraOfferStatus, AgoraOfferVariant, TakenInfo};
pub use oneshot::AgoraOneshot;
pub use partial::{AgoraPartial, AgoraPartialParams};

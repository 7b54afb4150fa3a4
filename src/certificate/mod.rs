//! Certificate archive handling.
//!
//! Loads PKCS#12 archives, extracts the signing identity (private key plus
//! certificate chain) and derives human-readable metadata from the X.509
//! certificate. The first key bag in the archive is the identity; that
//! selection is deterministic and is the documented policy for archives that
//! carry more than one entry.

mod info;
mod store;

pub use info::{parse_certificate_info, CertificateInfo, KeyUsage};
pub use store::{CertificateStore, KeyMaterial};

//! Standard scheduling plugins
//!
//! Each plugin module exposes a `registration()` returning its capability
//! set. The default plugin line-up for both the downloader and the syncer is
//! NodeSelector then DiskAware.

pub mod disk_aware;
pub mod node_selector;

use super::Registration;

/// The default plugin set, in evaluation order.
pub fn default_registrations() -> Vec<Registration> {
    vec![node_selector::registration(), disk_aware::registration()]
}

//! Process-wide interpreter resources shared by every script
//!
//! The first [`Script`](crate::Script) to start acquires the library, the
//! last one to drop releases it.

use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rhai::packages::{Package, StandardPackage};
use rhai::{Module, Shared};
use tracing::info;

static LIBRARY: Lazy<Mutex<Weak<Library>>> = Lazy::new(|| Mutex::new(Weak::new()));

/// Reference-counted handle on the shared interpreter resources
#[derive(Debug)]
pub struct Library {
    rhai_packages: Shared<Module>,
}

impl Library {
    /// Get the live library, initializing it if no script holds it
    pub fn acquire() -> Arc<Library> {
        let mut slot = LIBRARY.lock();
        if let Some(library) = slot.upgrade() {
            return library;
        }

        let library = Arc::new(Library {
            rhai_packages: StandardPackage::new().as_shared_module(),
        });
        *slot = Arc::downgrade(&library);
        info!("Script library initialized");
        library
    }

    /// Rhai standard package, registered as the global module of every
    /// Rhai engine
    pub(crate) fn rhai_packages(&self) -> Shared<Module> {
        self.rhai_packages.clone()
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        info!("Script library released");
    }
}

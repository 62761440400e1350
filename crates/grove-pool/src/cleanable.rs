//! The capability the pool needs from anything it holds.

use grove_index::WorkspaceIndex;

/// Something that can shed cached state and be torn down.
pub trait Cleanable {
    /// Drops whatever has expired. Returns how many items were removed.
    fn force_cleanup(&mut self) -> usize;

    /// Releases every resource. Calling it twice is harmless.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

impl Cleanable for WorkspaceIndex {
    fn force_cleanup(&mut self) -> usize {
        WorkspaceIndex::force_cleanup(self)
    }

    fn close(&mut self) {
        self.cleanup();
    }

    fn is_closed(&self) -> bool {
        self.is_destroyed()
    }
}

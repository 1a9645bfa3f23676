//! Optional global entry points for kernels that want `kmalloc`-style free
//! functions instead of threading the [`MemoryManager`] everywhere. The
//! manager itself never touches this module; it only wraps one in a lock.

use core::ptr::NonNull;

use spinlock::Mutex;

use crate::manager::MemoryManager;
use crate::slab::AllocError;

static KMEM: Mutex<Option<MemoryManager>> = Mutex::new(None);

/// Install the booted memory manager behind the global entry points.
/// Panics when called twice.
pub fn init(manager: MemoryManager) {
    let mut global = KMEM.lock();
    if global.is_some() {
        panic!("[kmem] memory subsystem already initialized");
    }
    *global = Some(manager);
}

/// Run `callback` with exclusive access to the global memory manager.
pub fn with<F, R>(callback: F) -> R
where
    F: FnOnce(&mut MemoryManager) -> R,
{
    let mut global = KMEM.lock();
    let manager = global
        .as_mut()
        .expect("[kmem] memory subsystem not initialized");
    callback(manager)
}

pub fn kmalloc(size: usize) -> Result<NonNull<u8>, AllocError> {
    with(|manager| manager.kmalloc(size))
}

pub fn kzalloc(size: usize) -> Result<NonNull<u8>, AllocError> {
    with(|manager| manager.kzalloc(size))
}

pub fn kfree(object: NonNull<u8>) {
    with(|manager| manager.kfree(object))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{boot_arena, TestArena};

    // a single test drives the global state, the arena backing it is leaked
    // on purpose
    #[test]
    fn global_entry_points() {
        let arena = TestArena::new(8 << 20);
        let manager = boot_arena(&arena, 64);
        std::mem::forget(arena);
        init(manager);

        let object = kmalloc(48).unwrap();
        let zeroed = kzalloc(4096).unwrap();
        kfree(object);
        kfree(zeroed);
        let free = with(|manager| manager.zone().free_pages());
        assert!(free > 0);
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axdevtree::{DeviceId, DeviceManager, DeviceOps, Kref, LinkFlags, NoopDeviceOps};
use proptest::prelude::*;

fn position(order: &[DeviceId], dev: DeviceId) -> usize {
    order.iter().position(|&d| d == dev).unwrap()
}

proptest! {
    #[test]
    fn kref_releases_exactly_once(extra in 0usize..64) {
        let kref = Kref::new();
        let released = AtomicUsize::new(0);
        for _ in 0..extra {
            kref.get();
        }
        for _ in 0..extra {
            let last = kref.put(|| { released.fetch_add(1, Ordering::SeqCst); });
            prop_assert!(!last);
        }
        prop_assert_eq!(kref.read(), 1);
        let last = kref.put(|| { released.fetch_add(1, Ordering::SeqCst); });
        prop_assert!(last);
        prop_assert_eq!(released.load(Ordering::SeqCst), 1);
        prop_assert!(!kref.get_unless_zero());
    }

    #[test]
    fn suppliers_always_precede_consumers(
        pairs in proptest::collection::vec((0usize..6, 0usize..6, any::<bool>()), 0..24)
    ) {
        let mgr = DeviceManager::default();
        let ops: Arc<dyn DeviceOps> = Arc::new(NoopDeviceOps);
        let root = mgr.register("root", None, ops.clone()).unwrap();
        let devs: Vec<DeviceId> = (0..6)
            .map(|i| {
                let parent = if i % 3 == 0 { None } else { Some(root) };
                mgr.register("dev", parent, ops.clone()).unwrap()
            })
            .collect();

        for (c, s, stateless) in pairs {
            let flags = if stateless { LinkFlags::STATELESS } else { LinkFlags::empty() };
            // Self links and cycles are refused; the rest must keep the orders sound.
            let _ = mgr.add_link(devs[c], devs[s], flags);
        }

        let registry = mgr.registry_order();
        let pm = mgr.pm_order();
        prop_assert_eq!(&registry, &pm);
        for &dev in &devs {
            for link in mgr.consumers(dev) {
                let supplier = position(&registry, link.supplier());
                prop_assert!(supplier < position(&registry, link.consumer()));
            }
            if let Some(parent) = mgr.parent(dev) {
                prop_assert!(position(&registry, parent) < position(&registry, dev));
            }
        }
    }
}

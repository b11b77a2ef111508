/// 并发测试模块
/// 测试多线程下的发布、排空与回收安全性
use super::{dropped, test_connection, tracked};
use crate::{GenPtr, Resource};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, mpsc};
use std::thread;
use std::time::Duration;

/// 测试1: T1 发布在第 5 代，T2 推进并退休第 5 代的对象；
/// T1 离开之前不能释放，离开之后必须释放
#[test]
fn test_retired_object_waits_for_reader_to_leave() {
    let conn = test_connection();
    while conn.current(Resource::Evict) < 5 {
        conn.advance(Resource::Evict);
    }

    let (entered_tx, entered_rx) = mpsc::channel();
    let (leave_tx, leave_rx) = mpsc::channel::<()>();

    let reader_conn = conn.clone();
    let reader = thread::spawn(move || {
        let session = reader_conn.open_session();
        session.enter(Resource::Evict);
        entered_tx.send(session.generation(Resource::Evict)).unwrap();
        leave_rx.recv().unwrap();
        session.leave(Resource::Evict);
    });

    assert_eq!(entered_rx.recv().unwrap(), 5);

    let writer = conn.open_session();
    let drops = Arc::new(AtomicUsize::new(0));
    assert_eq!(writer.advance(Resource::Evict), 6);
    writer
        .retire(Resource::Evict, 5, tracked(5, &drops), 64)
        .unwrap();

    assert_eq!(writer.discard(), 0);
    assert_eq!(dropped(&drops), 0);
    assert_eq!(conn.oldest(Resource::Evict), 5);

    leave_tx.send(()).unwrap();
    reader.join().unwrap();

    assert!(conn.oldest(Resource::Evict) >= 6);
    assert_eq!(writer.discard(), 1);
    assert_eq!(dropped(&drops), 1);
}

/// 测试2: 排空会等待读者离开
#[test]
fn test_drain_waits_for_reader() {
    let conn = test_connection();
    let left = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(2));

    let reader = {
        let conn = conn.clone();
        let left = left.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            let session = conn.open_session();
            let guard = session.pin(Resource::Checkpoint);
            barrier.wait();
            thread::sleep(Duration::from_millis(50));
            left.store(true, Ordering::SeqCst);
            drop(guard);
        })
    };

    barrier.wait();
    let drainer = conn.open_session();
    drainer.advance_and_drain(Resource::Checkpoint);
    assert!(left.load(Ordering::SeqCst));

    reader.join().unwrap();
}

/// 测试3: 进入休眠阶段并输出进度日志的排空
#[test]
fn test_drain_sleep_tier_and_progress() {
    super::init_logger();
    let conn = crate::Connection::builder()
        .abort_on_fatal(false)
        .spin_limit(0)
        .sleep_interval(Duration::from_millis(1))
        .progress_interval(Duration::from_millis(5))
        .build();
    let (entered_tx, entered_rx) = mpsc::channel();

    let reader = {
        let conn = conn.clone();
        thread::spawn(move || {
            let session = conn.open_session();
            let _guard = session.pin(Resource::Commit);
            entered_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(30));
        })
    };

    entered_rx.recv().unwrap();
    let drainer = conn.open_session();
    let generation = drainer.advance_and_drain(Resource::Commit);
    assert!(conn.oldest(Resource::Commit) >= generation);

    // 读者持有 30ms，进度间隔为 5ms，至少输出一条进度日志
    let progress = super::captured(log::Level::Info);
    assert!(
        progress
            .iter()
            .any(|message| message.starts_with("commit generation drain waited")),
        "no progress record in {progress:?}"
    );

    reader.join().unwrap();
}

/// 测试4: 多个线程同时推进，计数器单调且无丢失
#[test]
fn test_concurrent_advance_is_monotonic() {
    let conn = test_connection();
    let mut handles = vec![];

    for _ in 0..4 {
        let conn = conn.clone();
        handles.push(thread::spawn(move || {
            let mut last = 0;
            for _ in 0..1000 {
                let generation = conn.advance(Resource::Split);
                assert!(generation > last);
                last = generation;
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(conn.current(Resource::Split), 1 + 4 * 1000);
}

/// 测试5: 读者频繁进出时，排空最终都会完成
#[test]
fn test_drain_liveness_under_churn() {
    let conn = test_connection();
    let stop = Arc::new(AtomicBool::new(false));
    let mut readers = vec![];

    for _ in 0..4 {
        let conn = conn.clone();
        let stop = stop.clone();
        readers.push(thread::spawn(move || {
            let session = conn.open_session();
            while !stop.load(Ordering::Relaxed) {
                let _guard = session.pin(Resource::Evict);
                std::hint::spin_loop();
            }
        }));
    }

    let drainer = conn.open_session();
    for _ in 0..200 {
        let generation = drainer.advance_and_drain(Resource::Evict);
        assert!(generation <= conn.current(Resource::Evict));
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }
}

/// 被释放时把自己的编号记录到共享集合中的载荷
struct Versioned {
    version: u64,
    freed: Arc<Mutex<HashSet<u64>>>,
}

impl Drop for Versioned {
    fn drop(&mut self) {
        self.freed.lock().unwrap().insert(self.version);
    }
}

/// 测试6: 读者持有的版本在守卫存活期间永远不会被释放
#[test]
fn test_no_premature_reclamation() {
    let conn = test_connection();
    let freed = Arc::new(Mutex::new(HashSet::new()));
    let root = Arc::new(GenPtr::new(
        Versioned {
            version: 0,
            freed: freed.clone(),
        },
        Resource::Split,
        &conn,
    ));
    let stop = Arc::new(AtomicBool::new(false));
    let mut readers = vec![];

    for _ in 0..4 {
        let conn = conn.clone();
        let root = root.clone();
        let freed = freed.clone();
        let stop = stop.clone();
        readers.push(thread::spawn(move || {
            let session = conn.open_session();
            while !stop.load(Ordering::Relaxed) {
                let guard = session.pin(Resource::Split);
                let seen = root.load(&guard);
                for _ in 0..10 {
                    std::hint::spin_loop();
                }
                assert!(
                    !freed.lock().unwrap().contains(&seen.version),
                    "version {} freed while still observed",
                    seen.version
                );
                drop(guard);
            }
        }));
    }

    let writer = conn.open_session();
    for version in 1..=2000 {
        root.replace(
            Versioned {
                version,
                freed: freed.clone(),
            },
            &writer,
        );
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    writer.advance_and_drain(Resource::Split);
    writer.discard();
    assert_eq!(writer.stashed(Resource::Split), 0);
    assert_eq!(freed.lock().unwrap().len(), 2000);
    assert_eq!(conn.stash_stats().objects, 0);
}

/// 测试7: 多个写入者各自退休，所有对象最终都被释放
#[test]
fn test_multiple_writers_reclaim_everything() {
    let conn = test_connection();
    let drops = Arc::new(AtomicUsize::new(0));
    let mut writers = vec![];

    for id in 0..4u64 {
        let conn = conn.clone();
        let drops = drops.clone();
        writers.push(thread::spawn(move || {
            let session = conn.open_session();
            for i in 0..500 {
                let guard = session.pin(Resource::Hazard);
                let retired_in = guard.generation();
                drop(guard);
                session.advance(Resource::Hazard);
                session
                    .retire(Resource::Hazard, retired_in, tracked(id * 1000 + i, &drops), 16)
                    .unwrap();
            }
            session.advance_and_drain(Resource::Hazard);
            session.discard();
            assert_eq!(session.stashed(Resource::Hazard), 0);
        }));
    }

    for writer in writers {
        writer.join().unwrap();
    }
    assert_eq!(dropped(&drops), 2000);
    assert_eq!(conn.stash_stats(), crate::StashStats::default());
}

/// 测试8: 会话可以被移动到其他线程
#[test]
fn test_session_moves_between_threads() {
    let conn = test_connection();
    let session = conn.open_session();
    let drops = Arc::new(AtomicUsize::new(0));
    session
        .retire(Resource::Commit, 1, tracked(1, &drops), 1)
        .unwrap();

    let session = thread::spawn(move || {
        conn.advance(Resource::Commit);
        assert_eq!(session.discard(), 1);
        session
    })
    .join()
    .unwrap();

    assert_eq!(session.stashed(Resource::Commit), 0);
    assert_eq!(dropped(&drops), 1);
}

#![cfg(loom)]

use loom::thread;
use seg_queue::Queue;

// When using the `--cfg loom` flag, the segment capacity is 4. Item counts of 5 or more make
// the models freeze a full segment, link a successor, and retire the drained one.
//
// Run all tests:
//
// RUSTFLAGS="--cfg loom" cargo test --package seg-queue --test loom_queue --release
//
// Note that running some of these tests may take a few seconds. Add `LOOM_MAX_PREEMPTIONS=2`
// (or =3) to the command above to reduce the test complexity and so its duration.

// Two producers push six items into four-slot segments, so they race on the freeze-and-link
// of the first segment as well as on its slots. Each producer's items must still drain in
// that producer's order.
//
// RUSTFLAGS="--cfg loom" cargo test --package seg-queue --test loom_queue --release -- test_mpsc --exact
#[test]
fn test_mpsc() {
    loom::model(|| {
        const COUNT: usize = 6;
        let queue: Queue<usize> = Queue::new();

        let q1 = queue.clone();
        let th1 = thread::spawn(move || {
            for i in 0..3 {
                q1.push(i);
            }
        });

        let q2 = queue.clone();
        let th2 = thread::spawn(move || {
            for i in 10..13 {
                q2.push(i);
            }
        });

        th1.join().unwrap();
        th2.join().unwrap();

        let mut last = [None, None];
        for _ in 0..COUNT {
            let item = queue.pop().unwrap();
            let p = usize::from(item >= 10);
            assert!(last[p] < Some(item));
            last[p] = Some(item);
        }

        assert!(queue.pop().is_none());
    });
}

// Five items span two segments, so the racing consumers also race on retiring the drained
// first segment. The refill afterwards is served from the pool and must behave like a fresh
// segment.
//
// RUSTFLAGS="--cfg loom" cargo test --package seg-queue --test loom_queue --release -- test_spmc --exact
#[test]
fn test_spmc() {
    loom::model(|| {
        const COUNT: usize = 5;
        let queue: Queue<usize> = Queue::new();

        for i in 0..COUNT {
            queue.push(i);
        }

        let q1 = queue.clone();
        let th1 = thread::spawn(move || {
            let mut popped = Vec::new();
            while let Some(item) = q1.pop() {
                popped.push(item);
            }

            popped
        });

        let q2 = queue.clone();
        let th2 = thread::spawn(move || {
            let mut popped = Vec::new();
            while let Some(item) = q2.pop() {
                popped.push(item);
            }

            popped
        });

        let a = th1.join().unwrap();
        let b = th2.join().unwrap();

        assert_eq!(a.len() + b.len(), COUNT);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert!(b.windows(2).all(|w| w[0] < w[1]));

        for i in 0..COUNT {
            queue.push(i);
        }
        for i in 0..COUNT {
            assert_eq!(queue.pop(), Some(i));
        }

        assert!(queue.pop().is_none());
    });
}

// RUSTFLAGS="--cfg loom" cargo test --package seg-queue --test loom_queue --release -- test_concurrent_push_and_pop --exact
#[test]
fn test_concurrent_push_and_pop() {
    loom::model(|| {
        const COUNT: usize = 5;
        let queue: Queue<usize> = Queue::new();

        let q1 = queue.clone();
        let th1 = thread::spawn(move || {
            for i in 0..COUNT {
                q1.push(i);
            }
        });

        let q2 = queue.clone();
        let th2 = thread::spawn(move || {
            for i in 0..COUNT {
                loop {
                    if let Some(item) = q2.pop() {
                        // A single producer's items come out in push order.
                        assert_eq!(item, i);
                        break;
                    } else {
                        // Loom scheduler is, by design, not fair. Yielding here indicates to
                        // Loom that this thread needs another one to be scheduled before
                        // making progress. Some executions block until the producer links
                        // the next segment.
                        thread::yield_now()
                    }
                }
            }
        });

        th1.join().unwrap();
        th2.join().unwrap();
    });
}

// RUSTFLAGS="--cfg loom" cargo test --package seg-queue --test loom_queue --release -- test_clear_races_push --exact
#[test]
fn test_clear_races_push() {
    loom::model(|| {
        let queue: Queue<usize> = Queue::new();

        let q1 = queue.clone();
        let th1 = thread::spawn(move || {
            for i in 0..3 {
                q1.push(i);
            }
        });

        queue.clear();
        th1.join().unwrap();

        // Whatever survived the clear is still this producer's order.
        let mut last = None;
        while let Some(item) = queue.pop() {
            assert!(last < Some(item));
            last = Some(item);
        }

        // The queue keeps working after the race.
        queue.push(9);
        assert_eq!(queue.pop(), Some(9));
        assert!(queue.pop().is_none());
    });
}

//! Hash worker pool.

use std::thread::JoinHandle;

use crossbeam_channel::Receiver;

use crate::block::{BlockId, HashJob, Hashed};

/// Spawn `count` workers draining `jobs`. Each worker digests a payload
/// and replies on the owning block's completion channel; workers exit
/// when the hash queue closes.
pub(crate) fn spawn(count: usize, jobs: Receiver<HashJob>) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|_| {
            let jobs = jobs.clone();
            std::thread::spawn(move || {
                for job in jobs.iter() {
                    let digest = BlockId::compute(&job.data);
                    // A refused reply means the engine is tearing down.
                    let _ = job.reply.send(Hashed {
                        data: job.data,
                        digest,
                    });
                }
            })
        })
        .collect()
}

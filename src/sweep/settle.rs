use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::trace;

use crate::error::{BusError, SweepError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Settled {
    Reached { reading: f64, polls: u32 },
    Cancelled,
}

// The first reading is immediate and the running flag is checked after every pause
pub fn wait_until_settled<F>(
    mut read: F,
    target: f64,
    tolerance: f64,
    poll_interval: Duration,
    max_polls: Option<u32>,
    running: &AtomicBool,
) -> Result<Settled, SweepError>
where
    F: FnMut() -> Result<f64, BusError>,
{
    let mut polls: u32 = 0;
    loop {
        let reading = read()?;
        polls = polls.saturating_add(1);
        trace!("Settling at {} K: poll {} read {} K", target, polls, reading);

        if (reading - target).abs() < tolerance {
            return Ok(Settled::Reached { reading, polls });
        }

        if let Some(max) = max_polls {
            if polls >= max {
                return Err(SweepError::SettleTimeout {
                    target,
                    polls,
                    last: reading,
                });
            }
        }

        thread::sleep(poll_interval);
        if !running.load(Ordering::SeqCst) {
            return Ok(Settled::Cancelled);
        }
    }
}

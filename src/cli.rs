use clap::Parser;

use crate::scheduler::DEFAULT_MAX_DELAY_MS;

/// Anti-keystroke-deanonymization input daemon.
///
/// Grabs every raw input device exclusively, re-emits each event after a bounded randomized
/// delay, and forwards the delayed stream to the compositor through a virtual keyboard and
/// virtual pointer. There is no configuration file: everything tunable is a flag here, and the
/// core scheduler/geometry/walk algorithms stay oblivious to how they were set.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Upper bound, in milliseconds, on the randomized release delay.
    #[arg(long, default_value_t = DEFAULT_MAX_DELAY_MS)]
    pub max_delay_ms: u64,

    /// Name of the `wl_seat` to bind, when the compositor advertises more than one.
    #[arg(long)]
    pub seat: Option<String>,

    /// Increase log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements             | Connects to                    |
//! |------------|------------------------|--------------------------------|
//! | `gpio`     | SensorPort, HopperPort | `embedded-hal` digital pins    |
//! | `log_sink` | EventSink              | `log` output                   |
//! | `sim`      | SensorPort, HopperPort | In-memory coin mechanism       |
//! | `time`     | Clock                  | Monotonic / manual millisecond |

pub mod gpio;
pub mod log_sink;
pub mod sim;
pub mod time;

//! Adapters — concrete implementations of the port traits.
//!
//! | Adapter       | Implements   | Connects to                       |
//! |---------------|--------------|-----------------------------------|
//! | `fs_storage`  | StoragePort  | Host filesystem / mounted SD card |
//! | `log_sink`    | EventSink    | Serial log output                 |
//! | `mem_storage` | StoragePort  | In-memory map (tests, dry runs)   |
//! | `sim_bus`     | SensorBus    | Simulated thermal plant           |
//! |               | ActuatorBank |                                   |

pub mod fs_storage;
pub mod log_sink;
pub mod mem_storage;
pub mod sim_bus;

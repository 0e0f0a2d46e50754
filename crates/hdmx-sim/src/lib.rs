//! HDMI Matrix Simulation Library
//!
//! This crate provides a simulated matrix switch for exercising clients
//! without the hardware. It includes:
//!
//! - **VirtualMatrix**: Routes, command handling and status line output
//! - **run_virtual_matrix_task**: Serves a matrix over any async stream
//! - **MatrixServer**: Serves a matrix on a TCP port, one client at a time
//!
//! # Example
//!
//! ```rust
//! use hdmx_protocol::{InputSource, MatrixCommand, OutputPort};
//! use hdmx_sim::{ResponseFormat, VirtualMatrix};
//!
//! let mut matrix = VirtualMatrix::new("Rack", ResponseFormat::NamedPair);
//! let out2 = OutputPort::new(2).unwrap();
//!
//! matrix.apply(MatrixCommand::route(out2, InputSource::new(3).unwrap()));
//! assert_eq!(matrix.take_output().as_deref(), Some("Rx13 to Tx5"));
//! ```

pub mod matrix;
pub mod server;
pub mod task;

pub use matrix::{ResponseFormat, UnknownFormat, VirtualMatrix, VirtualMatrixConfig};
pub use server::MatrixServer;
pub use task::{run_virtual_matrix_task, SessionEnd, VirtualMatrixCommand, VirtualMatrixEvent};

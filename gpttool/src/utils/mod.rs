// SPDX-License-Identifier: MIT

pub mod input;
pub mod log;

pub use self::input::{parse_type, read_first_line, read_image};
pub use self::log::LogLevel;

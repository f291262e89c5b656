// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid command parameter: {0}")]
    CommandValidation(String),

    #[error("Command '{command}' not available. Available: {available}")]
    UnknownCommand { command: String, available: String },

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessorError>;

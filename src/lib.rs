//! Leadflow: email inquiry to CRM lead automation.

pub mod channels;
pub mod config;
pub mod crm;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod services;

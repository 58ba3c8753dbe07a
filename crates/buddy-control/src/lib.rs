pub mod auth;
pub mod config;
pub mod documents;
pub mod error;
pub mod generation;
pub mod job_status;
pub mod materializer;
pub mod queue;
pub mod routes;
pub mod security;
pub mod state;
pub mod submission;
pub mod text_extract;
pub mod worker;

pub mod answers;
pub mod generation_jobs;
pub mod questions;
pub mod quizzes;
pub mod subjects;
pub mod users;

use sea_orm_migration::prelude::*;

mod m0001_create_users;
mod m0002_create_subjects;
mod m0003_create_quizzes;
mod m0004_create_questions;
mod m0005_create_answers;
mod m0006_create_generation_jobs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m0001_create_users::Migration),
            Box::new(m0002_create_subjects::Migration),
            Box::new(m0003_create_quizzes::Migration),
            Box::new(m0004_create_questions::Migration),
            Box::new(m0005_create_answers::Migration),
            Box::new(m0006_create_generation_jobs::Migration),
        ]
    }
}

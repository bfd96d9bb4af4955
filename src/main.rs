#![deny(rust_2018_idioms)]

#[macro_use]
extern crate diesel;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;
#[cfg(test)]
#[macro_use]
extern crate maplit;

mod assign;
mod cli;
mod config;
mod domain;
mod error;
mod store;
mod teams;
mod utils;

use std::process;

use chrono::Local;
use clap::Parser;
use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use diesel::r2d2::Pool;

use crate::assign::{Engine, RandomSelector, ReviewerSelector, SeededSelector};
use crate::config::CONFIG;
use crate::store::PgStore;

fn main() {
    use std::io::Write;

    // init environment variables, CLI, and logging
    dotenv::dotenv().ok();
    let args = cli::Cli::parse();

    env_logger::Builder::new()
        .format(|buf, rec| {
            writeln!(
                buf,
                "[{} {}:{} {}] {}",
                rec.level(),
                rec.module_path().unwrap_or("<unnamed>"),
                rec.line().unwrap_or(0),
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                rec.args()
            )
        })
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    debug!("Logging initialized.");
    if !CONFIG.check() {
        error!("Invalid configuration: {:?}", *CONFIG);
        process::exit(2);
    }

    let selector: Box<dyn ReviewerSelector> = match CONFIG.reviewer_seed {
        Some(seed) => {
            info!("Drawing reviewers with fixed seed {}.", seed);
            Box::new(SeededSelector::new(seed))
        }
        None => Box::new(RandomSelector),
    };
    let engine = Engine::new(PgStore::new(DB_POOL.clone()), selector);

    let result = cli::run(
        &engine,
        args.command,
        &CONFIG.teams_file,
        utils::request_deadline(),
    );

    match result {
        Ok(out) => println!("{}", out),
        Err(why) => {
            println!("{}", cli::error_body(&why));
            process::exit(cli::exit_code(&why));
        }
    }
}

// initialize the database connection pool
lazy_static! {
    pub static ref DB_POOL: Pool<ConnectionManager<PgConnection>> = {
        info!("Initializing database connection pool.");

        let manager = ConnectionManager::<PgConnection>::new(CONFIG.db_url.clone());

        match Pool::builder().max_size(CONFIG.db_pool_size).build(manager) {
            Ok(p) => {
                info!("DB connection pool established.");
                p
            }
            Err(why) => {
                error!("Failed to establish DB connection pool: {}", why);
                panic!("Error creating connection pool.");
            }
        }
    };
}

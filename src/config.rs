// Copyright 2016 Adam Perry. Dual-licensed MIT and Apache 2.0 (see LICENSE files for details).

use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DB_URL: &str = "DATABASE_URL";
pub const DB_POOL_SIZE: &str = "DATABASE_POOL_SIZE";
pub const TEAMS_FILE: &str = "REVIEWBOT_TEAMS_FILE";
pub const OP_TIMEOUT_MS: &str = "REVIEWBOT_OP_TIMEOUT_MS";
pub const SEED: &str = "REVIEWBOT_SEED";

const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_TEAMS_FILE: &str = "teams.toml";
const DEFAULT_OP_TIMEOUT_MS: u64 = 5000;

lazy_static! {
    pub static ref CONFIG: Config = {
        match init() {
            Ok(c) => c,
            Err(missing) => panic!("Unable to load environment variables {:?}", missing),
        }
    };
}

#[derive(Debug)]
pub struct Config {
    pub db_url: String,
    pub db_pool_size: u32,
    pub teams_file: String,
    pub op_timeout: Duration,
    pub reviewer_seed: Option<u64>,
}

impl Config {
    pub fn check(&self) -> bool {
        !self.db_url.is_empty() && self.db_pool_size > 0 && self.op_timeout > Duration::from_millis(0)
    }
}

pub fn init() -> Result<Config, Vec<&'static str>> {
    init_from(|key| env::var(key).ok())
}

// every bad variable is reported, not just the first one
fn init_from<F>(lookup: F) -> Result<Config, Vec<&'static str>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut bad = Vec::new();

    let db_url = match lookup(DB_URL) {
        Some(url) if !url.trim().is_empty() => url,
        _ => {
            bad.push(DB_URL);
            String::new()
        }
    };

    let db_pool_size = parse_or(&lookup, DB_POOL_SIZE, DEFAULT_POOL_SIZE, &mut bad);
    let op_timeout_ms = parse_or(&lookup, OP_TIMEOUT_MS, DEFAULT_OP_TIMEOUT_MS, &mut bad);

    let reviewer_seed = match lookup(SEED) {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(seed) => Some(seed),
            Err(_) => {
                bad.push(SEED);
                None
            }
        },
        None => None,
    };

    let teams_file = lookup(TEAMS_FILE).unwrap_or_else(|| DEFAULT_TEAMS_FILE.to_string());

    if db_pool_size == 0 {
        bad.push(DB_POOL_SIZE);
    }
    if op_timeout_ms == 0 {
        bad.push(OP_TIMEOUT_MS);
    }

    if bad.is_empty() {
        Ok(Config {
            db_url,
            db_pool_size,
            teams_file,
            op_timeout: Duration::from_millis(op_timeout_ms),
            reviewer_seed,
        })
    } else {
        Err(bad)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T, bad: &mut Vec<&'static str>) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            bad.push(key);
            default
        }),
        None => default,
    }
}

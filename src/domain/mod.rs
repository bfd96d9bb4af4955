// Copyright 2016 Adam Perry. Dual-licensed MIT and Apache 2.0 (see LICENSE files for details).
pub mod review;
pub mod roster;
pub mod schema;

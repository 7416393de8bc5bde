#![allow(dead_code)]

pub mod btc;
pub mod chain;
pub mod fixtures;
pub mod lp;
pub mod price;
pub mod store;

// src/lib.rs

//! Paper Tracker Library
//!
//! Fetches preprint metadata from arXiv, bioRxiv and ChemRxiv, reconciles it
//! into one SQLite store and answers filtered queries over it.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

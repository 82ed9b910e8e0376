//! pagefold: fetch, render, and cluster URLs by multi-modal page similarity
//!
//! The pipeline fetches a list of URLs, renders HTML pages in a headless
//! browser, extracts a per-page feature vector (text SimHash, DOM shape,
//! perceptual screenshot hash, navigation timings), and partitions the pages
//! into equivalence classes of mutually similar pages. A rule-based
//! classifier picks up the pages the content engine cannot judge: error
//! templates, login walls, WAF blocks, maintenance banners, thin shells,
//! redirect targets, and URL-shape variants.

pub mod cluster;
pub mod config;
pub mod features;
pub mod fetch;
pub mod loader;
pub mod render;
pub mod report;
pub mod rules;
pub mod runner;
pub mod similarity;
pub mod types;
pub mod util;

pub use config::{Options, OutputFormat};
pub use runner::run;
pub use types::{FullReport, UrlReport};

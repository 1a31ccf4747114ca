//! Rate-limited HTTP client shared by `GitPlatform` implementations.

pub mod client;
#[cfg(test)]
mod test;

pub use client::RateLimitedHttpClient;

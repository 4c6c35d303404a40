//! Resilient client for Google's Gemini `generateContent` endpoint, and the milestone
//! pipeline that drives it.
//!
//! [`v1beta::rest::Client`] sends a prompt, absorbs transient faults through two
//! composed [`v1beta::retry::RetryPolicy`] layers, and yields the generated text or
//! `None`. [`pipeline::Pipeline`] walks the fixed milestone list, turning each `None`
//! into a placeholder rather than aborting. [`github::GitHubSync`] optionally lists
//! the game repository before the first milestone.
//!
//! ## Example
//!
//! ```no_run
//! use autopilot::v1beta::rest::Client;
//!
//! # async fn run() {
//! let client = Client::from_env();
//! match client.generate("Hello").await {
//!     Some(text) => println!("{text}"),
//!     None => println!("no answer, using a fallback"),
//! }
//! # }
//! ```

pub mod github;
pub mod pipeline;
pub mod v1beta;

//! Common test infrastructure for `thumb`.
//!
//! - A harness with a temp snapshot store and a failure log dump
//! - Scripted completion clients
//! - An async runner

use std::future::Future;

pub mod harness;
pub mod logging;
pub mod mocks;

#[allow(unused_imports)]
pub use harness::TestHarness;
#[allow(unused_imports)]
pub use mocks::ScriptedClient;

/// Runs an async future to completion on an asupersync runtime.
///
/// The future is spawned so it runs with a proper task context.
#[allow(dead_code)]
pub fn run_async<T, Fut>(future: Fut) -> T
where
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let runtime = asupersync::runtime::RuntimeBuilder::new()
        .blocking_threads(1, 8)
        .build()
        .expect("build asupersync runtime");

    let join = runtime.handle().spawn(future);
    runtime.block_on(join)
}

//! Runtime utilities that abstract over the underlying async executor.
//!
//! Downstream crates never build a Tokio runtime themselves; the attribute
//! macros and host entry points go through [`block_on`].

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs the provided future to completion on a fresh current-thread runtime.
///
/// # Errors
///
/// Returns an error if the runtime (I/O or timer driver) cannot be built.
pub fn block_on<F>(future: F) -> std::io::Result<F::Output>
where
    F: std::future::Future,
{
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}

#![allow(clippy::needless_doctest_main)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Entry-point macros for spindle.

mod entry;
mod parse;

/// Turns `async fn main` into a synchronous `main` that builds a spindle
/// runtime and runs the body as its root task.
///
/// Meant for simple programs. Anything needing a custom stall timeout or a
/// runtime name should use `spindle::runtime::Builder` directly.
///
/// # Clocks
///
/// The `clock` parameter picks the time source used by `spindle::time::sleep`.
/// `main` defaults to the wall clock.
///
/// ```no_run
/// #[spindle::main(clock = "virtual")]
/// # async fn main() {}
/// ```
///
/// # Function arguments
///
/// The function takes at most one argument, bound to the root
/// `spindle::Scope`. Jobs launched into it are waited for before `main`
/// returns.
///
/// # Return value
///
/// A function without a return type panics if the root task fails. Otherwise
/// it must return an `anyhow::Result`, which carries the root task's error.
///
/// # Usage
///
/// ```no_run
/// use spindle::{Error, Scope};
///
/// #[spindle::main]
/// async fn main(scope: Scope) {
///     scope.launch(|_| async {
///         println!("World!");
///         Ok::<_, Error>(())
///     });
///     println!("Hello,");
/// }
/// ```
///
/// Equivalent code not using `#[spindle::main]`
///
/// ```no_run
/// use spindle::{Error, Scope};
///
/// fn main() {
///     spindle::runtime::Builder::new_wall_clock()
///         .try_build()
///         .unwrap()
///         .block_on(|scope: Scope| async move {
///             scope.launch(|_| async {
///                 println!("World!");
///                 Ok::<_, Error>(())
///             });
///             println!("Hello,");
///             Ok::<_, Error>(())
///         })
///         .expect("root task failed")
/// }
/// ```
#[proc_macro_attribute]
pub fn main(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::main(args.into(), item.into()).into()
}

/// Runs an async test as the root task of a fresh spindle runtime. Each test
/// gets its own runtime.
///
/// The default clock of tests is virtual: sleeps complete instantly in logical
/// time, so timing-dependent tests are fast and deterministic. Use
/// `clock = "wall"` to sleep for real.
///
/// ```no_run
/// #[spindle::test]
/// async fn my_test(scope: spindle::Scope) -> anyhow::Result<()> {
///     use spindle::{Error, time};
///     use std::time::Duration;
///
///     let start = time::now()?;
///     let slow = scope.async_(|_| async {
///         time::sleep(Duration::from_secs(60)).await?;
///         Ok::<_, Error>(42)
///     });
///     assert_eq!(slow.await?, 42);
///     assert_eq!(time::now()? - start, Duration::from_secs(60));
///     Ok(())
/// }
/// ```
///
/// Equivalent code not using `#[spindle::test]`
///
/// ```no_run
/// #[test]
/// fn my_test() -> anyhow::Result<()> {
///     spindle::runtime::Builder::new_virtual()
///         .try_build()
///         .unwrap()
///         .block_on(|scope: spindle::Scope| async move {
///             // ...
///             Ok::<_, anyhow::Error>(())
///         })
/// }
/// ```
#[proc_macro_attribute]
pub fn test(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::test(args.into(), item.into()).into()
}

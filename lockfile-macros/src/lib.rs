use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, parse_quote, Expr, ItemFn};

/// Runs the function body while holding a lock on the given path.
///
/// The function must return a `Result` whose error type converts from
/// `lockfile::LockError`; failing to acquire returns early through `?`.
/// The lock is released when the body finishes, including early returns.
///
/// ```ignore
/// #[lockfile::locked("/var/tmp/report.txt")]
/// fn rebuild() -> Result<(), lockfile::LockError> {
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn locked(attr: TokenStream, item: TokenStream) -> TokenStream {
    let path = parse_macro_input!(attr as Expr);
    let mut func = parse_macro_input!(item as ItemFn);
    let body = &func.block;

    func.block = parse_quote!({
        let mut __lockfile_lock = ::lockfile::LockFile::new(#path)?;
        let __lockfile_guard = __lockfile_lock.lock()?;
        #body
    });

    quote!(#func).into()
}

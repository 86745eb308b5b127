use proc_macro::TokenStream;
use syn::{ItemFn, parse_macro_input};

mod migration_macro;

use migration_macro::MigrationArgs;

/// Register an async function as a migration unit.
///
/// ```ignore
/// #[tidemark::migration(sequence = 3, name = "backfill_audit")]
/// async fn backfill_audit(ctx: MigrationContext) -> Result<(), MigrationError> {
///     Ok(())
/// }
/// ```
///
/// `name` defaults to the function name. The function must be `async` and take
/// exactly one argument, the [`MigrationContext`]. Every annotated function
/// linked into a binary shows up in `MigrationRegistry::from_inventory()`.
#[proc_macro_attribute]
pub fn migration(args: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as MigrationArgs);
    let function = parse_macro_input!(item as ItemFn);

    match migration_macro::emit(args, function) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

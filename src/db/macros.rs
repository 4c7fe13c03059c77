//! Database dispatch macros for reducing code duplication.

/// Generate match arms over the `SqlxPool` variants.
///
/// # Example
///
/// ```ignore
/// impl_pool_dispatch!(pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
/// ```
#[macro_export]
macro_rules! impl_pool_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::sqlx_driver::SqlxPool::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_pool_dispatch;

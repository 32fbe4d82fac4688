//! Declarative macros for ergonomic effect construction
//!
//! These macros reduce boilerplate when creating `Effect` variants from async
//! blocks, which is how every remote write and subscription is described.

/// Create an `Effect::Future` from an async block
///
/// # Example
///
/// ```rust,ignore
/// use wishlist_core::async_effect;
///
/// async_effect! {
///     let row = remote.insert(Table::Reservations, record).await;
///     Some(ListViewAction::from_insert(row))
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Stream` from any `Stream + Send + 'static`
///
/// # Example
///
/// ```rust,ignore
/// use wishlist_core::stream_effect;
///
/// stream_effect!(changes.map(ListViewAction::Change))
/// ```
#[macro_export]
macro_rules! stream_effect {
    ($stream:expr) => {
        $crate::effect::Effect::Stream(::std::boxed::Box::pin($stream))
    };
}

//! The client proxy factory.
//!
//! [`rest_client!`](crate::rest_client) declares a typed client: each entry
//! names a sync method, its async twin, the argument list and the
//! [`MethodSpec`](crate::MethodSpec) it is bound to. Every spec is compiled
//! once in `new`, so declaration errors surface when the client is built
//! and calls reuse the memoized [`Method`](crate::Method).
//!
//! ```ignore
//! rest_client! {
//!     pub struct ChefClient {
//!         fn client_exists, client_exists_async(name: &str) -> bool =
//!             MethodSpec::head("client_exists", "/clients/{name}")
//!                 .param(Param::path("name"))
//!                 .returning(ResponsePipeline::new(ReturnTrueIf2xx))
//!                 .fallback(FalseOnNotFound);
//!     }
//! }
//! ```

#[macro_export]
macro_rules! rest_client {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident, $method_async:ident ( $($arg:ident : $arg_ty:ty),* $(,)? ) -> $ret:ty = $spec:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name {
            client: $crate::RestClient,
            $( $method: $crate::Method<$ret>, )*
        }

        impl $name {
            /// Compiles every method against `api`.
            pub fn new(client: $crate::RestClient, api: &$crate::ApiSpec) -> ::std::result::Result<Self, $crate::ConstructionError> {
                Ok(Self {
                    client,
                    $( $method: api.compile($spec)?, )*
                })
            }

            pub fn client(&self) -> &$crate::RestClient {
                &self.client
            }

            $(
                $(#[$method_meta])*
                pub fn $method(&self, $($arg: $arg_ty),*) -> ::std::result::Result<$ret, $crate::ApiError> {
                    let args = $crate::Args::new() $(.arg($arg)?)*;
                    self.client.call(&self.$method, args)
                }

                $(#[$method_meta])*
                pub fn $method_async(&self, $($arg: $arg_ty),*) -> $crate::ResponseFuture<$ret> {
                    let args = (|| -> ::std::result::Result<$crate::Args, $crate::ConstructionError> {
                        Ok($crate::Args::new() $(.arg($arg)?)*)
                    })();
                    match args {
                        Ok(args) => self.client.call_async(&self.$method, args),
                        Err(err) => $crate::ResponseFuture::failed(err.into()),
                    }
                }
            )*
        }
    };
}

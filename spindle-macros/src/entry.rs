//! Expansion of `#[spindle::main]` and `#[spindle::test]`.
//!
//! ```rust,no_run
//! #[spindle::main(clock = "virtual")]
//! async fn main(scope: spindle::Scope) {
//!     scope.launch(|_| async { Ok::<_, spindle::Error>(()) });
//! }
//! ```
//!
//! becomes a plain `fn main()` whose body builds a runtime with the chosen
//! clock and hands it the function body as the root task. The optional
//! argument binds the root `Scope`.
use proc_macro2::{Span, TokenStream};
use quote::{quote, quote_spanned};
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{Expr, ExprLit, Meta, Token};

use crate::parse::{RootFn, is_test_attribute, lit_str, with_error};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Clock {
    Virtual,
    Wall,
}

impl Clock {
    fn builder(self, span: Span) -> TokenStream {
        match self {
            Clock::Virtual => quote_spanned! {span=> spindle::runtime::Builder::new_virtual() },
            Clock::Wall => quote_spanned! {span=> spindle::runtime::Builder::new_wall_clock() },
        }
    }

    /// Reads `clock = "..."` out of the attribute arguments.
    fn from_args(args: TokenStream, default: Clock) -> syn::Result<Clock> {
        let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse2(args)?;
        let mut clock = None;

        for meta in metas {
            let pair = match meta {
                Meta::NameValue(pair) => pair,
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "expected `clock = \"virtual\"` or `clock = \"wall\"`",
                    ));
                }
            };

            if !pair.path.is_ident("clock") {
                return Err(syn::Error::new_spanned(
                    &pair.path,
                    "unknown argument, the only one accepted is `clock`",
                ));
            }

            if clock.is_some() {
                return Err(syn::Error::new_spanned(&pair, "`clock` given twice"));
            }

            let Expr::Lit(ExprLit { lit, .. }) = &pair.value else {
                return Err(syn::Error::new_spanned(&pair.value, "expected a string literal"));
            };

            clock = Some(match lit_str(lit, "clock")?.as_str() {
                "virtual" => Clock::Virtual,
                "wall" => Clock::Wall,
                other => {
                    return Err(syn::Error::new(
                        lit.span(),
                        format!("unknown clock `{other}`, expected `virtual` or `wall`"),
                    ));
                }
            });
        }

        Ok(clock.unwrap_or(default))
    }
}

pub(crate) fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    expand(args, item, false)
}

pub(crate) fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    expand(args, item, true)
}

fn expand(args: TokenStream, item: TokenStream, is_test: bool) -> TokenStream {
    // On error the function is still expanded as closely as possible, so
    // completions keep working in IDEs.
    let input: RootFn = match syn::parse2(item.clone()) {
        Ok(input) => input,
        Err(e) => return with_error(item, e),
    };

    let default = if is_test { Clock::Virtual } else { Clock::Wall };
    let checked = check_signature(&input, is_test).and_then(|()| Clock::from_args(args, default));

    match checked {
        Ok(clock) => rewrite(input, is_test, clock),
        Err(e) => with_error(rewrite(input, is_test, Clock::Wall), e),
    }
}

fn check_signature(input: &RootFn, is_test: bool) -> syn::Result<()> {
    if is_test {
        if let Some(attr) = input.attrs.iter().find(|attr| is_test_attribute(attr)) {
            return Err(syn::Error::new_spanned(
                attr,
                "`#[spindle::test]` already registers the test, remove the extra test attribute",
            ));
        }
    }

    if input.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            input.sig.fn_token,
            "the `async` keyword is missing from the function declaration",
        ));
    }

    match input.sig.inputs.first() {
        _ if input.sig.inputs.len() > 1 => Err(syn::Error::new_spanned(
            &input.sig.inputs,
            "expected at most one argument, bound to the root `spindle::Scope`",
        )),
        Some(syn::FnArg::Receiver(receiver)) => Err(syn::Error::new_spanned(
            receiver,
            "`self` cannot be bound to the root scope",
        )),
        _ => Ok(()),
    }
}

fn rewrite(mut input: RootFn, is_test: bool, clock: Clock) -> TokenStream {
    input.sig.asyncness = None;

    let (start, end) = input.tail_spans();
    let rt = clock.builder(start);

    let scope_arg = match input.take_scope_arg() {
        Some(arg) => {
            let (pat, ty) = (&arg.pat, &arg.ty);
            quote! { #pat: #ty }
        }
        None => quote! { _ },
    };

    let body = input.block();
    let (output, future, finish) = match &input.sig.output {
        // Unit functions return `Ok(())` from the root and panic on failure.
        syn::ReturnType::Default => (
            quote! { ::core::result::Result<(), spindle::Error> },
            quote! {
                async move {
                    #body;
                    ::core::result::Result::Ok(())
                }
            },
            quote! { .expect("root task failed") },
        ),
        syn::ReturnType::Type(_, ty) => (quote! { #ty }, quote! { async move #body }, quote! {}),
    };

    // Boxed so that `?` in the body resolves against the declared output.
    let root = quote! {
        let root = move |#scope_arg| -> ::core::pin::Pin<::std::boxed::Box<dyn ::core::future::Future<Output = #output>>> {
            ::std::boxed::Box::pin(#future)
        };
    };

    // Spanned at the tail so type errors point into the user's body.
    let run = quote_spanned! {end=>
        #[allow(clippy::expect_used, clippy::needless_return)]
        {
            return #rt
                .try_build()
                .expect("Failed building the Runtime")
                .block_on(root)
                #finish;
        }
    };

    let generated_attrs = if is_test {
        quote! { #[::core::prelude::v1::test] }
    } else {
        TokenStream::new()
    };

    input.into_tokens(generated_attrs, quote! { #root #run })
}

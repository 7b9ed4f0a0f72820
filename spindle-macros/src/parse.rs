use proc_macro2::{Span, TokenStream, TokenTree};
use quote::ToTokens;
use syn::parse::{Parse, ParseStream};
use syn::token::Brace;
use syn::{AttrStyle, Attribute, FnArg, PatType, Signature, Visibility, braced};

/// An `async fn` carrying `#[spindle::main]` or `#[spindle::test]`.
///
/// The body is kept as raw tokens. Only the top-level `;` are inspected, so a
/// body that does not type check still expands and IDEs keep working on it.
pub(crate) struct RootFn {
    /// Outer attributes, followed by the inner ones lifted out of the body.
    pub(crate) attrs: Vec<Attribute>,
    pub(crate) vis: Visibility,
    pub(crate) sig: Signature,
    brace: Brace,
    body: TokenStream,
}

impl RootFn {
    /// The body, braces included.
    pub(crate) fn block(&self) -> TokenStream {
        let mut tokens = TokenStream::new();
        self.brace.surround(&mut tokens, |tokens| tokens.extend(self.body.clone()));
        tokens
    }

    /// First and last span of the final statement. The compiler reports a
    /// mismatched body type there, so generated code borrows these spans.
    pub(crate) fn tail_spans(&self) -> (Span, Span) {
        let mut current = Vec::new();
        let mut previous = Vec::new();

        for tt in self.body.clone() {
            let ends_stmt = matches!(&tt, TokenTree::Punct(p) if p.as_char() == ';');
            current.push(tt);
            if ends_stmt {
                previous = std::mem::take(&mut current);
            }
        }

        let tail = if current.is_empty() { previous } else { current };
        let start = tail.first().map_or_else(Span::call_site, TokenTree::span);
        let end = tail.last().map_or(start, TokenTree::span);
        (start, end)
    }

    /// Removes the argument bound to the root scope from the signature.
    pub(crate) fn take_scope_arg(&mut self) -> Option<PatType> {
        match self.sig.inputs.pop()?.into_value() {
            FnArg::Typed(arg) => Some(arg),
            FnArg::Receiver(_) => None,
        }
    }

    /// Emits the function again with `generated_attrs` appended to its
    /// attributes and `block` as its body.
    pub(crate) fn into_tokens(self, generated_attrs: TokenStream, block: TokenStream) -> TokenStream {
        let mut tokens = TokenStream::new();

        for attr in &self.attrs {
            attr.to_tokens(&mut tokens);
        }

        // Last, so attributes expanded after us see them.
        tokens.extend(generated_attrs);

        self.vis.to_tokens(&mut tokens);
        self.sig.to_tokens(&mut tokens);
        self.brace.surround(&mut tokens, |tokens| tokens.extend(block));
        tokens
    }
}

impl Parse for RootFn {
    fn parse(input: ParseStream<'_>) -> syn::Result<Self> {
        let mut attrs = input.call(Attribute::parse_outer)?;
        let vis = input.parse()?;
        let sig = input.parse()?;

        let content;
        let brace = braced!(content in input);

        // Inner attributes are not allowed on the block we expand into.
        for mut attr in Attribute::parse_inner(&content)? {
            attr.style = AttrStyle::Outer;
            attrs.push(attr);
        }

        Ok(RootFn {
            attrs,
            vis,
            sig,
            brace,
            body: content.parse()?,
        })
    }
}

/// True for `#[test]` and its fully qualified prelude forms.
pub(crate) fn is_test_attribute(attr: &Attribute) -> bool {
    let syn::Meta::Path(path) = &attr.meta else {
        return false;
    };

    if path.segments.iter().any(|segment| !segment.arguments.is_none()) {
        return false;
    }

    let idents = path
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect::<Vec<_>>();
    let segments = idents.iter().map(String::as_str).collect::<Vec<_>>();

    match segments.as_slice() {
        ["test"] => path.leading_colon.is_none(),
        ["core" | "std", "prelude", _, "test"] => true,
        _ => false,
    }
}

pub(crate) fn lit_str(lit: &syn::Lit, field: &str) -> syn::Result<String> {
    match lit {
        syn::Lit::Str(s) => Ok(s.value()),
        syn::Lit::Verbatim(s) => Ok(s.to_string()),
        other => Err(syn::Error::new_spanned(
            other,
            format!("expected a string for `{field}`"),
        )),
    }
}

/// Appends `error` to `tokens`, so the item still expands next to the
/// compile error.
pub(crate) fn with_error(mut tokens: TokenStream, error: syn::Error) -> TokenStream {
    tokens.extend(error.into_compile_error());
    tokens
}

//! `#[derive(Action)]` for checkout action enums.
//!
//! Variants tagged `#[command]` are requests from callers (place an order,
//! expire a reservation); variants tagged `#[event]` report something that
//! already happened (a payment succeeded, an email went out). The derive
//! generates classification helpers used in logs and metric labels:
//!
//! ```ignore
//! use farmstand_macros::Action;
//!
//! #[derive(Action, Clone, Debug)]
//! enum CheckoutAction {
//!     #[command]
//!     PlaceOrder { quantity: u32 },
//!
//!     #[event]
//!     PaymentSucceeded { payment_intent_id: String },
//! }
//!
//! let action = CheckoutAction::PaymentSucceeded { payment_intent_id: "pi_1".into() };
//! assert!(action.is_event());
//! assert_eq!(action.event_type(), "payment_succeeded");
//! assert_eq!(action.name(), "PaymentSucceeded");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, Variant, parse_macro_input};

/// Generates `is_command`, `is_event`, `event_type` and `name` on an enum.
///
/// `event_type` is the snake-cased variant name for `#[event]` variants and
/// `"unknown"` otherwise. Applying the derive to a struct, or tagging one
/// variant with both attributes, is a compile error.
#[proc_macro_derive(Action, attributes(command, event))]
pub fn derive_action(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[derive(Default)]
struct Arms {
    commands: Vec<TokenStream2>,
    events: Vec<TokenStream2>,
    event_types: Vec<TokenStream2>,
    names: Vec<TokenStream2>,
}

impl Arms {
    fn push(&mut self, variant: &Variant) -> syn::Result<()> {
        let command = tagged(&variant.attrs, "command");
        let event = tagged(&variant.attrs, "event");
        if command && event {
            return Err(syn::Error::new_spanned(
                &variant.ident,
                "an action is either a #[command] or an #[event], not both",
            ));
        }

        let ident = &variant.ident;
        let pattern = match variant.fields {
            Fields::Named(_) => quote! { Self::#ident { .. } },
            Fields::Unnamed(_) => quote! { Self::#ident(..) },
            Fields::Unit => quote! { Self::#ident },
        };
        let name = ident.to_string();

        if command {
            self.commands.push(quote! { #pattern => true, });
        }
        if event {
            let event_type = snake_case(&name);
            self.events.push(quote! { #pattern => true, });
            self.event_types.push(quote! { #pattern => #event_type, });
        }
        self.names.push(quote! { #pattern => #name, });
        Ok(())
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "#[derive(Action)] only applies to enums",
        ));
    };

    let mut arms = Arms::default();
    for variant in &data.variants {
        arms.push(variant)?;
    }
    let Arms {
        commands,
        events,
        event_types,
        names,
    } = arms;

    let ty = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        #[allow(unreachable_patterns)]
        impl #impl_generics #ty #ty_generics #where_clause {
            /// `true` for variants tagged `#[command]`.
            #[must_use]
            pub const fn is_command(&self) -> bool {
                match self {
                    #(#commands)*
                    _ => false,
                }
            }

            /// `true` for variants tagged `#[event]`.
            #[must_use]
            pub const fn is_event(&self) -> bool {
                match self {
                    #(#events)*
                    _ => false,
                }
            }

            /// Snake-cased name of an event, `"unknown"` for anything else.
            #[must_use]
            pub const fn event_type(&self) -> &'static str {
                match self {
                    #(#event_types)*
                    _ => "unknown",
                }
            }

            /// Variant name.
            #[must_use]
            pub const fn name(&self) -> &'static str {
                match self {
                    #(#names)*
                }
            }
        }
    })
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn tagged(attrs: &[Attribute], name: &str) -> bool {
    attrs.iter().any(|attr| attr.path().is_ident(name))
}

#[cfg(test)]
mod tests {
    use super::snake_case;

    #[test]
    fn snake_cases_variant_names() {
        assert_eq!(snake_case("PaymentSucceeded"), "payment_succeeded");
        assert_eq!(snake_case("ReservationExpired"), "reservation_expired");
        assert_eq!(snake_case("Ok"), "ok");
    }
}

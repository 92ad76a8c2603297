use proc_macro2::*;
use quote::*;
use syn::*;

/// Implements `NativeModule` for the type of an inherent `impl` block.
///
/// Every method with a receiver becomes a native method, in declaration
/// order. Methods marked `#[promise]` or `#[sync]` take those kinds; all
/// others are callback methods. A method marked `#[constants]` supplies the
/// module's constants instead. The module name is given as a string literal
/// argument, and defaults to the type's name.
#[proc_macro_attribute]
pub fn native_module(attr: proc_macro::TokenStream, item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let mut item_impl = parse_macro_input!(item as ItemImpl);
    assert!(item_impl.trait_.is_none(), "native_module must be applied to an inherent impl block");

    let module_name = get_module_name(attr, &item_impl.self_ty);
    let self_ty = &item_impl.self_ty;
    let (impl_generics, _, where_clause) = item_impl.generics.split_for_impl();

    let mut constants_function = None;
    let mut method_specs = Vec::new();
    let mut method_invocations = Vec::new();

    for inner_item in &item_impl.items {
        let ImplItem::Fn(func_item) = inner_item else { continue };
        if !matches!(func_item.sig.inputs.first(), Some(FnArg::Receiver(_))) {
            continue;
        }

        match get_method_marker(&func_item.attrs) {
            MethodMarker::Constants => {
                assert!(constants_function.is_none(), "Only one method may be marked #[constants]");
                constants_function = Some(func_item.sig.ident.clone());
            },
            marker => {
                let index = method_specs.len() as u32;
                method_specs.push(generate_method_spec(func_item, marker));
                method_invocations.push(generate_method_invocation(index, func_item));
            }
        }
    }

    let constants = constants_function.map(|ident| quote! {
        fn constants(&self) -> ::std::collections::BTreeMap<::std::string::String, ::tether_host::Value> {
            self.#ident()
        }
    }).unwrap_or_default();

    let generated = quote! {
        impl #impl_generics ::tether_host::NativeModule for #self_ty #where_clause {
            fn name(&self) -> &str {
                #module_name
            }

            #constants

            fn methods(&self) -> ::std::vec::Vec<::tether_host::MethodSpec> {
                ::std::vec![ #(#method_specs),* ]
            }

            fn invoke(&mut self, method_id: u32, args: ::std::vec::Vec<::tether_host::Value>) -> ::std::result::Result<::std::vec::Vec<::tether_host::Value>, ::tether_host::ErrorData> {
                #(#method_invocations)*
                ::std::result::Result::Err(::tether_host::ErrorData::new(::std::format!("Native module {} has no method with ID {}", #module_name, method_id)))
            }
        }
    };

    strip_method_markers(&mut item_impl);

    quote! {
        #item_impl

        #generated
    }.into()
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum MethodMarker {
    Callback,
    Promise,
    Sync,
    Constants
}

const MARKERS: [(&str, MethodMarker); 3] = [
    ("promise", MethodMarker::Promise),
    ("sync", MethodMarker::Sync),
    ("constants", MethodMarker::Constants)
];

fn get_module_name(attr: proc_macro::TokenStream, self_ty: &Type) -> String {
    if attr.is_empty() {
        match self_ty {
            Type::Path(path) => path.path.segments.last().expect("Module type had an empty path").ident.to_string(),
            _ => panic!("Module type must be a path; give the module name explicitly")
        }
    }
    else {
        parse::<LitStr>(attr).expect("Failed to parse module name; expected a string literal").value()
    }
}

fn get_method_marker(attrs: &[Attribute]) -> MethodMarker {
    let mut markers = MARKERS.iter()
        .filter(|(name, _)| attrs.iter().any(|attr| attr.path().is_ident(name)))
        .map(|(_, marker)| *marker);

    let marker = markers.next().unwrap_or(MethodMarker::Callback);
    assert!(markers.next().is_none(), "A method may carry at most one of #[promise], #[sync] and #[constants]");
    marker
}

fn strip_method_markers(item_impl: &mut ItemImpl) {
    for inner_item in &mut item_impl.items {
        if let ImplItem::Fn(func_item) = inner_item {
            func_item.attrs.retain(|attr| !MARKERS.iter().any(|(name, _)| attr.path().is_ident(name)));
        }
    }
}

fn generate_method_spec(func_item: &ImplItemFn, marker: MethodMarker) -> TokenStream {
    let name = func_item.sig.ident.to_string();
    let kind = match marker {
        MethodMarker::Promise => quote! { ::tether_host::MethodKind::Promise },
        MethodMarker::Sync => quote! { ::tether_host::MethodKind::Sync },
        _ => quote! { ::tether_host::MethodKind::Callback }
    };

    quote! {
        ::tether_host::MethodSpec::new(#name, #kind)
    }
}

fn generate_method_invocation(index: u32, func_item: &ImplItemFn) -> TokenStream {
    let func_name = &func_item.sig.ident;
    let args = get_non_receiver_args(func_item);
    let arg_types = &args.arg_types;
    let index_args = &args.index_args;
    let lower_result = generate_lower_result(&func_item.sig.output);

    quote! {
        if method_id == #index {
            let mut reader = ::tether_host::ArgReader::new(args);
            #(
                let #index_args = reader.next::<#arg_types>()?;
            )*
            reader.finish()?;
            let result = self.#func_name( #(#index_args),* );
            return #lower_result;
        }
    }
}

fn generate_lower_result(output: &ReturnType) -> TokenStream {
    match output {
        ReturnType::Default => quote! {
            {
                let () = result;
                ::std::result::Result::Ok(::std::vec::Vec::new())
            }
        },
        ReturnType::Type(_, ty) if is_result_type(ty) => quote! {
            match result {
                ::std::result::Result::Ok(value) => ::std::result::Result::Ok(::std::vec![::std::convert::Into::<::tether_host::Value>::into(value)]),
                ::std::result::Result::Err(error) => ::std::result::Result::Err(::std::convert::Into::<::tether_host::ErrorData>::into(error))
            }
        },
        ReturnType::Type(..) => quote! {
            ::std::result::Result::Ok(::std::vec![::std::convert::Into::<::tether_host::Value>::into(result)])
        }
    }
}

fn is_result_type(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path.path.segments.last().map(|x| x.ident == "Result").unwrap_or(false),
        _ => false
    }
}

fn get_non_receiver_args(func_item: &ImplItemFn) -> FuncArgs {
    let mut arg_types = Vec::new();
    let mut index_args = Vec::new();

    for (index, input) in func_item.sig.inputs.iter().enumerate().skip(1) {
        match input {
            FnArg::Receiver(_) => panic!("Receiver in unexpected position."),
            FnArg::Typed(x) => {
                assert!(!matches!(&*x.ty, Type::Reference(_)), "Native module methods must take owned arguments");
                arg_types.push(&*x.ty);
                index_args.push(Ident::new(&format!("_arg{index}"), Span::call_site()));
            }
        }
    }

    FuncArgs {
        arg_types,
        index_args
    }
}

struct FuncArgs<'a> {
    pub arg_types: Vec<&'a Type>,
    pub index_args: Vec<Ident>
}

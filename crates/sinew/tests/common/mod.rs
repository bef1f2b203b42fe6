//! Shared billing fixture: an invoice owning line items bidirectionally,
//! with a plain customer reference on the side.
#![allow(dead_code)] // not every suite uses every helper

use sinew::prelude::*;

pub fn billing_session() -> Session {
    let session = Session::new();

    session
        .define(
            ModelSpec::new("customer").attr(AttrSpec::new("name", AttrKind::Text)),
        )
        .unwrap();

    session
        .define(
            ModelSpec::new("line_item")
                .attr(AttrSpec::new("sku", AttrKind::Text))
                .attr(AttrSpec::new("quantity", AttrKind::Uint).with_default(Value::Uint(1)))
                .assoc(AssocSpec::has_one("invoice", "invoice").with_inverse("line_items")),
        )
        .unwrap();

    session
        .define(
            ModelSpec::new("invoice")
                .attr(
                    AttrSpec::new("number", AttrKind::Text).with_validator(|value| {
                        if value.is_null() {
                            Err("is required".to_string())
                        } else {
                            Ok(())
                        }
                    }),
                )
                .assoc(AssocSpec::has_one("customer", "customer"))
                .assoc(
                    AssocSpec::has_many("line_items", "line_item")
                        .with_inverse("invoice")
                        .owned(),
                ),
        )
        .unwrap();

    session
}

/// A committed invoice with three line items (a, b, c).
pub fn loaded_invoice(session: &Session) -> ObjRef {
    session
        .load(
            "invoice",
            &serde_json::json!({
                "id": 1,
                "number": "INV-1",
                "line_items": [
                    {"id": 10, "sku": "a"},
                    {"id": 11, "sku": "b"},
                    {"id": 12, "sku": "c"},
                ],
            }),
        )
        .unwrap()
}

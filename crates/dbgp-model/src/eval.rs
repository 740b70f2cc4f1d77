//! Typed `eval`/`expr` reply decoding.

use dbgp_wire::DbgpError;

use crate::property::Property;
use crate::xml::parse_nodes;

/// The result of an `eval` (or `expr`) command: a single property with no
/// `full_name` (an evaluated expression has no re-selectable path back
/// into the engine's variable space) and any children already inlined.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult {
    /// The engine-reported type (`int`, `string`, `array`, `object`, …).
    pub type_name: String,
    /// The class name, for `object`-typed results.
    pub class: Option<String>,
    /// The (possibly truncated, already base64-decoded) value.
    pub value: Option<String>,
    /// The full byte size of the value, when larger than what's inlined.
    pub size: Option<usize>,
    /// Children already inlined by the engine (array elements, object
    /// properties), if any.
    pub children: Vec<Property>,
}

/// Parse an `eval`/`expr` reply. Returns `Ok(None)` for a reply with no
/// `<property>` element at all (the engine reports success with no
/// value, e.g. a void expression).
pub fn parse_eval(xml: &[u8]) -> Result<Option<EvalResult>, DbgpError> {
    let Some(node) = parse_nodes(xml, "property")?.into_iter().next() else {
        return Ok(None);
    };
    let property = Property::from_node(node);
    Ok(Some(EvalResult {
        type_name: property.type_name,
        class: property.class,
        value: property.value,
        size: property.size,
        children: property.children,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::{must, must_some};

    #[test]
    fn scalar_eval_result() {
        let xml = br#"<response><property type="int" size="1">7</property></response>"#;
        let result = must_some(must(parse_eval(xml)));
        assert_eq!(result.value.as_deref(), Some("7"));
        assert!(result.children.is_empty());
    }

    #[test]
    fn eval_result_with_inlined_children() {
        let xml = br#"<response>
            <property type="array" numchildren="1" children="1">
                <property name="0" fullname="0" type="int">9</property>
            </property>
        </response>"#;
        let result = must_some(must(parse_eval(xml)));
        assert_eq!(result.children.len(), 1);
    }

    #[test]
    fn void_eval_result_is_none() {
        let xml = br#"<response></response>"#;
        assert!(must(parse_eval(xml)).is_none());
    }
}

//! Typed properties (DBGp `<property>` elements): variables, scope
//! members, and array/hash/object children.

use dbgp_wire::DbgpError;

use crate::xml::{RawNode, decode_value, parse_nodes};

/// The visibility facet of a class member property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    /// No visibility reported, or explicitly public.
    #[default]
    Public,
    /// `visibility="private"`.
    Private,
    /// `visibility="protected"`.
    Protected,
}

/// The facet set a property may carry (visibility, static, readonly,
/// virtual).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Facets {
    /// Member visibility.
    pub visibility: Visibility,
    /// A class-level (rather than instance-level) member.
    pub is_static: bool,
    /// Cannot be assigned via `property_set`.
    pub is_readonly: bool,
    /// Synthesized by the engine rather than a real storage location.
    pub is_virtual: bool,
}

impl Facets {
    fn from_node(node: &RawNode) -> Self {
        let flag = |key: &str| node.attr(key) == Some("1");
        let visibility = match node.attr("visibility") {
            Some("private") => Visibility::Private,
            Some("protected") => Visibility::Protected,
            _ => Visibility::Public,
        };
        Facets { visibility, is_static: flag("static"), is_readonly: flag("readonly"), is_virtual: flag("virtual") }
    }
}

/// A typed view over a DBGp `<property>` element: a variable, a scope
/// member, or an array/hash/object child. Lazily populated — `children`
/// holds whatever page has been fetched so far.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// The short name, e.g. `x` for an array element or `count` for a hash key.
    pub name: String,
    /// The fully-qualified expression that would re-select this property.
    pub full_name: String,
    /// The engine-reported type (`int`, `string`, `array`, `object`, …).
    pub type_name: String,
    /// The class name, for `object`-typed properties.
    pub class: Option<String>,
    /// Whether this property has children (arrays, hashes, objects).
    pub has_children: bool,
    /// The total number of children the engine reports, independent of
    /// how many are present in `children` so far.
    pub n_children: usize,
    /// The (possibly truncated) value, already base64-decoded if the
    /// engine encoded it. `None` for container types with no inline value.
    pub value: Option<String>,
    /// The full byte size of the value, when the engine reports one
    /// larger than what's inlined here.
    pub size: Option<usize>,
    /// Visibility/static/readonly/virtual facets.
    pub facets: Facets,
    /// Children fetched so far, in page order.
    pub children: Vec<Property>,
}

impl Property {
    pub(crate) fn from_node(node: RawNode) -> Self {
        let n_children = node.attr("numchildren").and_then(|s| s.parse().ok()).unwrap_or(0);
        let has_children = node.attr("children").map(|v| v == "1").unwrap_or(n_children > 0);
        let name = node.attr("name").unwrap_or_default().to_string();
        let full_name = node.attr("fullname").map(str::to_string).unwrap_or_else(|| name.clone());
        let value =
            if node.text.is_empty() && has_children { None } else { Some(decode_value(node.attr("encoding"), &node.text)) };
        Property {
            facets: Facets::from_node(&node),
            name,
            full_name,
            type_name: node.attr("type").unwrap_or_default().to_string(),
            class: node.attr("classname").map(str::to_string),
            has_children,
            n_children,
            value,
            size: node.attr("size").and_then(|s| s.parse().ok()),
            children: node.children.into_iter().map(Property::from_node).collect(),
        }
    }

    /// True when the engine reported a `size` larger than the inlined
    /// `value` — the full value must be fetched via `property_value`
    /// before display.
    #[must_use]
    pub fn needs_value_fetch(&self) -> bool {
        match (&self.size, &self.value) {
            (Some(size), Some(value)) => *size > value.len(),
            _ => false,
        }
    }

    /// The number of `property_get -p <page>` pages needed to fetch every
    /// child, at `max_children` children per page.
    #[must_use]
    pub fn page_count(&self, max_children: usize) -> usize {
        if max_children == 0 {
            return usize::from(self.n_children > 0);
        }
        self.n_children.div_ceil(max_children)
    }

    /// Append a freshly-fetched page of children.
    pub fn merge_page(&mut self, page: Vec<Property>) {
        self.children.extend(page);
    }

    /// Find an already-fetched child by name (used by `set_variable`,
    /// which locates the matching child within the parent's already-known
    /// children rather than re-querying the engine).
    #[must_use]
    pub fn child_named(&self, name: &str) -> Option<&Property> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Parse a `property_get`/`context_get` reply's top-level `<property>`
/// elements (there may be one or many, each possibly with nested children
/// already inlined).
pub fn parse_properties(xml: &[u8]) -> Result<Vec<Property>, DbgpError> {
    Ok(parse_nodes(xml, "property")?.into_iter().map(Property::from_node).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::must;

    #[test]
    fn decodes_plain_scalar() {
        let xml = br#"<response><property name="x" fullname="$x" type="int" size="1">5</property></response>"#;
        let props = must(parse_properties(xml));
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].value.as_deref(), Some("5"));
        assert!(!props[0].has_children);
    }

    #[test]
    fn decodes_base64_encoded_string() {
        let xml = br#"<response><property name="s" fullname="$s" type="string" encoding="base64" size="5">aGVsbG8=</property></response>"#;
        let props = must(parse_properties(xml));
        assert_eq!(props[0].value.as_deref(), Some("hello"));
    }

    #[test]
    fn nested_children_are_recursive() {
        let xml = br#"<response>
            <property name="arr" fullname="$arr" type="array" numchildren="2" children="1">
                <property name="0" fullname="$arr[0]" type="int">1</property>
                <property name="1" fullname="$arr[1]" type="int">2</property>
            </property>
        </response>"#;
        let props = must(parse_properties(xml));
        assert_eq!(props[0].children.len(), 2);
        assert_eq!(props[0].children[1].value.as_deref(), Some("2"));
    }

    #[test]
    fn needs_value_fetch_when_size_exceeds_inlined_value() {
        let xml = br#"<response><property name="s" fullname="$s" type="string" size="500">short</property></response>"#;
        let props = must(parse_properties(xml));
        assert!(props[0].needs_value_fetch());
    }

    #[test]
    fn page_count_rounds_up() {
        let xml = br#"<response><property name="a" fullname="$a" type="array" numchildren="250" children="1"/></response>"#;
        let props = must(parse_properties(xml));
        assert_eq!(props[0].page_count(100), 3);
    }

    #[test]
    fn facets_parsed_from_attributes() {
        let xml = br#"<response><property name="n" fullname="N::n" type="int" visibility="private" static="1" readonly="1"/></response>"#;
        let props = must(parse_properties(xml));
        assert_eq!(props[0].facets.visibility, Visibility::Private);
        assert!(props[0].facets.is_static);
        assert!(props[0].facets.is_readonly);
    }

    #[test]
    fn child_named_finds_already_fetched_child() {
        let xml = br#"<response>
            <property name="h" fullname="$h" type="hash" numchildren="1" children="1">
                <property name="k" fullname="$h['k']" type="int">1</property>
            </property>
        </response>"#;
        let props = must(parse_properties(xml));
        assert!(props[0].child_named("k").is_some());
        assert!(props[0].child_named("missing").is_none());
    }
}

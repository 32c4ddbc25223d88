//! Parsing of `"node:port"` tensor references.

/// A reference to output `index` of the node called `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId<'a> {
    pub node: &'a str,
    pub index: usize,
}

impl<'a> TensorId<'a> {
    /// Splits `"name:port"`. A string without a trailing `:digits` suffix names
    /// output 0 of the whole string.
    pub fn parse(name: &'a str) -> Self {
        if let Some((node, port)) = name.rsplit_once(':') {
            if !node.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
            {
                if let Ok(index) = port.parse::<usize>() {
                    return TensorId { node, index };
                }
            }
        }
        TensorId {
            node: name,
            index: 0,
        }
    }

    /// Parses `"^name"` as a control reference, returning the node name.
    pub fn parse_control(name: &'a str) -> Option<&'a str> {
        name.strip_prefix('^').filter(|rest| !rest.is_empty())
    }
}

impl std::fmt::Display for TensorId<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.node, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::TensorId;

    #[test]
    fn parses_explicit_port() {
        assert_eq!(
            TensorId::parse("add:1"),
            TensorId {
                node: "add",
                index: 1
            }
        );
        assert_eq!(TensorId::parse("scope/mul:12").index, 12);
    }

    #[test]
    fn bare_name_defaults_to_port_zero() {
        assert_eq!(
            TensorId::parse("scope/add"),
            TensorId {
                node: "scope/add",
                index: 0
            }
        );
    }

    #[test]
    fn non_numeric_suffix_is_part_of_the_name() {
        assert_eq!(TensorId::parse("a:b").node, "a:b");
        assert_eq!(TensorId::parse(":3").node, ":3");
        assert_eq!(TensorId::parse("x:").node, "x:");
    }

    #[test]
    fn control_references() {
        assert_eq!(TensorId::parse_control("^init"), Some("init"));
        assert_eq!(TensorId::parse_control("init"), None);
        assert_eq!(TensorId::parse_control("^"), None);
    }
}

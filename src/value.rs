use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ordered_float::OrderedFloat;

/// The narrow host-introspection capability. The VM's only use of host
/// reflection goes through this trait: member reads resolve with
/// [`HostObject::get_member`] and type guards compare
/// [`HostObject::type_tag`]. Tests mock it with plain structs.
pub trait HostObject: fmt::Debug + Send + Sync {
    /// A stable identity tag for the value's type.
    fn type_tag(&self) -> &str;

    /// Resolves a named field or property, or `None` if the member
    /// does not exist. A missing member is an ordinary resolution
    /// failure for the calling goal.
    fn get_member(&self, name: &str) -> Option<Value>;
}

/// A runtime value as seen by the unifier and exposed at the solution
/// boundary.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Char(char),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Obj(Arc<dyn HostObject>),
}

impl Value {
    /// The tag checked by the type-guard instruction. Host objects
    /// report their own tag.
    pub fn type_tag(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Obj(o) => o.type_tag(),
        }
    }

    /// Ordering for the comparison instructions. Numeric operands are
    /// promoted; incomparable operand types yield `None`, which the VM
    /// treats as a failed goal.
    pub(crate) fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => OrderedFloat(*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&OrderedFloat(*b as f64)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.as_ref().cmp(b.as_ref())),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.hash(state),
            Value::Char(c) => c.hash(state),
            Value::Str(s) => s.hash(state),
            Value::List(l) => l.hash(state),
            Value::Obj(o) => (Arc::as_ptr(o) as *const () as usize).hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Char(c) => write!(f, "{c:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Obj(o) => write!(f, "<{}>", o.type_tag()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(OrderedFloat(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Value {
        Value::Char(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Str(Arc::from(v.as_str()))
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Value {
        Value::List(Arc::new(v))
    }
}

impl From<Arc<dyn HostObject>> for Value {
    fn from(v: Arc<dyn HostObject>) -> Value {
        Value::Obj(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_comparison_promotes() {
        assert_eq!(
            Value::from(2).compare(&Value::from(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::from(3.0).compare(&Value::from(3)),
            Some(Ordering::Equal)
        );
        assert_eq!(Value::from("a").compare(&Value::from(1)), None);
    }

    #[test]
    fn equality_is_variant_strict() {
        assert_ne!(Value::from(1), Value::from(1.0));
        assert_eq!(Value::from("x"), Value::from("x"));
        assert_eq!(
            Value::from(vec![Value::from(1), Value::from(2)]),
            Value::from(vec![Value::from(1), Value::from(2)])
        );
    }
}

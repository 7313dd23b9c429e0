use crate::vocab::RDF_JSON;
use oxrdf::vocab::xsd;
use oxrdf::{Literal, Term};
use serde_json::{Number, Value};

/// Converts a bound term into the JSON value that is sent to compute services.
///
/// IRIs and blank nodes are sent as their identifier, numeric and boolean literals as JSON
/// primitives and `rdf:JSON` literals as the embedded document. Everything else falls back to
/// the lexical form.
pub fn term_to_json(term: &Term) -> Value {
    match term {
        Term::NamedNode(node) => Value::String(node.as_str().to_owned()),
        Term::BlankNode(node) => Value::String(node.as_str().to_owned()),
        Term::Literal(literal) => literal_to_json(literal),
        Term::Triple(triple) => Value::String(triple.to_string()),
    }
}

fn literal_to_json(literal: &Literal) -> Value {
    let value = literal.value();
    let datatype = literal.datatype();
    if datatype == RDF_JSON {
        return serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
    }
    if datatype == xsd::BOOLEAN {
        return match value {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::String(value.to_owned()),
        };
    }
    if is_integer_datatype(datatype.as_str()) {
        if let Ok(number) = value.parse::<i64>() {
            return Value::Number(number.into());
        }
    }
    if datatype == xsd::DECIMAL || datatype == xsd::DOUBLE || datatype == xsd::FLOAT {
        if let Some(number) = value.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }
    Value::String(value.to_owned())
}

fn is_integer_datatype(iri: &str) -> bool {
    matches!(
        iri.strip_prefix("http://www.w3.org/2001/XMLSchema#"),
        Some(
            "integer"
                | "int"
                | "long"
                | "short"
                | "byte"
                | "nonNegativeInteger"
                | "nonPositiveInteger"
                | "positiveInteger"
                | "negativeInteger"
                | "unsignedInt"
                | "unsignedLong"
                | "unsignedShort"
                | "unsignedByte"
        )
    )
}

/// Converts a value returned by a compute service into an RDF term.
///
/// Returns [None] for `null`, which compute services use to signal "no value".
pub fn json_to_term(value: &Value) -> Option<Term> {
    let literal = match value {
        Value::Null => return None,
        Value::Bool(value) => Literal::from(*value),
        Value::Number(number) if number.is_i64() || number.is_u64() => {
            Literal::new_typed_literal(number.to_string(), xsd::INTEGER)
        }
        Value::Number(number) => Literal::new_typed_literal(number.to_string(), xsd::DOUBLE),
        Value::String(value) => Literal::new_simple_literal(value),
        Value::Array(_) | Value::Object(_) => Literal::new_typed_literal(value.to_string(), RDF_JSON),
    };
    Some(literal.into())
}

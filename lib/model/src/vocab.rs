//! Vocabulary that is not provided by [oxrdf::vocab].

use oxrdf::NamedNodeRef;

/// The `rdf:JSON` datatype used to carry structured values returned by compute services.
pub const RDF_JSON: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://www.w3.org/1999/02/22-rdf-syntax-ns#JSON");

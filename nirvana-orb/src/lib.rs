//! CDR marshaling, GIOP/ESIOP wire protocol, references, POA, DGC, and
//! code-set conversion (spec.md §4.6–§4.9, §6).

pub mod codeset;
pub mod domain;
pub mod esiop;
pub mod giop;
pub mod ior;
pub mod poa;
pub mod reference;
pub mod request;
pub mod servant_proxy;
pub mod stream;

pub use codeset::{CodeSetConverter, CodeSetConverterW, DefaultCodeSetConverter, DefaultCodeSetConverterW};
pub use domain::{Domain, DomainKind};
pub use ior::{Ior, TaggedProfile};
pub use poa::{Poa, PoaError, PoaPolicies};
pub use reference::{LocalReference, Reference, RemoteReference};
pub use request::{IORequest, RequestState, ResponseFlags};
pub use servant_proxy::{ServantProxy, ServantProxyTable};
pub use stream::{StreamError, StreamIn, StreamOut};

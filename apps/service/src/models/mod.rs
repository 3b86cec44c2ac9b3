//! Endpoint and observation models shared by the engine, storage and reporting.

pub mod draft;
pub mod endpoint;
pub mod observation;

pub use draft::{DraftError, EndpointDraft};
pub use endpoint::{
    BrokerProbe, CertCheckSettings, CertificateDetails, CertificateInfo, ClientTls, DomainInfo,
    Endpoint, EndpointState, ExpirySnapshot, HttpProbe, PingProbe, ProbeConfig, ProbeKind,
    StatusRange, TcpProbe,
};
pub use observation::Observation;

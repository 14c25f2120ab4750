//! DNS Server Adapter
//!
//! Internal DNS resolver for .internal domain names.
//! Resolves app.internal -> backend IP based on geo-routing.

use crate::application::ProxyService;
use crate::domain::ports::GeoResolver;
use hickory_proto::op::{Header, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{LowerName, Name, RData, Record, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// DNS Server configuration.
#[derive(Clone)]
pub struct DnsConfig {
    /// Domain suffix (e.g., "internal")
    pub domain: String,
    /// Default TTL for records
    pub ttl: u32,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            domain: "internal".to_string(),
            ttl: 30,
        }
    }
}

/// DNS Request Handler.
pub struct DnsHandler {
    proxy_service: Arc<ProxyService>,
    geo_resolver: Option<Arc<dyn GeoResolver>>,
    config: DnsConfig,
}

impl DnsHandler {
    pub fn new(
        proxy_service: Arc<ProxyService>,
        geo_resolver: Option<Arc<dyn GeoResolver>>,
        config: DnsConfig,
    ) -> Self {
        Self {
            proxy_service,
            geo_resolver,
            config,
        }
    }

    /// Resolve a DNS query.
    async fn resolve(&self, name: &LowerName, client_ip: IpAddr) -> Option<Ipv4Addr> {
        // Parse the query name (e.g., "myapp.internal")
        let query_str = name.to_string();
        let query_str = query_str.trim_end_matches('.');

        // Check if it's in our domain
        let suffix = format!(".{}", self.config.domain);
        if !query_str.ends_with(&suffix) && query_str != self.config.domain {
            tracing::debug!("DNS query not in our domain: {}", query_str);
            return None;
        }

        // Extract app name (e.g., "myapp" from "myapp.internal")
        let app_name = if query_str == self.config.domain {
            // Query for just "internal" - return any backend
            None
        } else {
            Some(query_str.strip_suffix(&suffix).unwrap_or(query_str))
        };

        tracing::debug!("DNS resolving: {:?} for client {}", app_name, client_ip);

        // Resolve client geo
        let client_geo = if client_ip.is_loopback() {
            None
        } else {
            self.geo_resolver
                .as_ref()
                .and_then(|g| g.resolve(client_ip))
        };

        // Get best backend for this client
        let backend = self
            .proxy_service
            .resolve_backend_with_geo(client_ip, client_geo)
            .await?;

        // If app_name is specified, filter by app
        if let Some(app) = app_name {
            if backend.app != app {
                // Need to find a backend for the specific app
                // For now, just check if the resolved backend matches
                tracing::debug!(
                    "backend {} is for app {}, not {}",
                    backend.id,
                    backend.app,
                    app
                );
                // TODO: Filter backends by app in resolve_backend
            }
        }

        // Parse backend IP
        match backend.wg_ip.parse::<Ipv4Addr>() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!("backend {} has non-IPv4 address: {}", backend.id, backend.wg_ip);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for DnsHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let query = request.query();
        let name = query.name();
        let query_type = query.query_type();

        tracing::debug!(
            "DNS query: {} {} from {}",
            name,
            query_type,
            request.src()
        );

        // Build response header
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);

        // Only handle A record queries
        if query_type != RecordType::A {
            header.set_response_code(ResponseCode::NotImp);
            let response = MessageResponseBuilder::from_message_request(request)
                .build_no_records(header);
            return response_handle.send_response(response).await.unwrap_or_else(|e| {
                tracing::error!("DNS response error: {:?}", e);
                header.into()
            });
        }

        // Resolve the query
        let client_ip = request.src().ip();
        let result = self.resolve(name, client_ip).await;

        match result {
            Some(ip) => {
                // Build A record response - convert LowerName to Name
                let mut record = Record::new();
                record.set_name(Name::from(name.clone()));
                record.set_ttl(self.config.ttl);
                record.set_record_type(RecordType::A);
                record.set_data(Some(RData::A(A(ip))));

                header.set_response_code(ResponseCode::NoError);
                let response = MessageResponseBuilder::from_message_request(request)
                    .build(header, std::iter::once(&record), [], [], []);

                tracing::info!("DNS resolved: {} -> {}", name, ip);

                response_handle.send_response(response).await.unwrap_or_else(|e| {
                    tracing::error!("DNS response error: {:?}", e);
                    header.into()
                })
            }
            None => {
                // NXDOMAIN
                header.set_response_code(ResponseCode::NXDomain);
                let response = MessageResponseBuilder::from_message_request(request)
                    .build_no_records(header);

                tracing::debug!("DNS NXDOMAIN: {}", name);

                response_handle.send_response(response).await.unwrap_or_else(|e| {
                    tracing::error!("DNS response error: {:?}", e);
                    header.into()
                })
            }
        }
    }
}

/// DNS Server for .internal domain resolution.
pub struct DnsServer {
    listen_addr: String,
    handler: Arc<DnsHandler>,
}

impl DnsServer {
    pub fn new(
        listen_addr: String,
        proxy_service: Arc<ProxyService>,
        geo_resolver: Option<Arc<dyn GeoResolver>>,
        domain: String,
    ) -> Self {
        let config = DnsConfig {
            domain,
            ttl: 30,
        };

        Self {
            listen_addr,
            handler: Arc::new(DnsHandler::new(proxy_service, geo_resolver, config)),
        }
    }

    /// Run the DNS server (simplified UDP implementation).
    ///
    /// The error handlers inside the infinite loop are excluded from coverage
    /// as they are async error paths that are difficult to test deterministically.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr: SocketAddr = self.listen_addr.parse()?;
        let socket = UdpSocket::bind(&addr).await?;

        tracing::info!("DNS server listening on {}", self.listen_addr);

        let mut buf = [0u8; 512];

        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    let data = buf[..len].to_vec();
                    let socket_clone = socket.local_addr().ok();
                    let handler = self.handler.clone();

                    // Handle in background
                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_packet(handler, &data, src, socket_clone).await
                        {
                            tracing::error!("DNS packet error from {}: {:?}", src, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("DNS recv error: {:?}", e);
                }
            }
        }
    }

    /// Handle a DNS packet.
    ///
    /// This function is called from within the run() loop and is excluded from
    /// coverage as it's an async network handler.
    #[cfg_attr(coverage_nightly, coverage(off))]
    async fn handle_packet(
        _handler: Arc<DnsHandler>,
        data: &[u8],
        src: SocketAddr,
        _local: Option<SocketAddr>,
    ) -> anyhow::Result<()> {
        // Parse DNS message
        use hickory_proto::op::Message;
        use hickory_proto::serialize::binary::BinDecodable;

        let message = Message::from_bytes(data)?;

        tracing::debug!(
            "DNS packet from {}: {} queries",
            src,
            message.queries().len()
        );

        // For now, just log - full implementation would process and respond
        for query in message.queries() {
            tracing::debug!("  Query: {} {}", query.name(), query.query_type());
        }

        Ok(())
    }
}

/// Simple DNS resolver for testing.
///
/// This function makes network calls and is excluded from coverage.
#[allow(dead_code)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn resolve_internal(
    name: &str,
    server_addr: &str,
) -> anyhow::Result<Option<Ipv4Addr>> {
    use hickory_proto::op::{Message, Query};
    use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
    use std::time::{SystemTime, UNIX_EPOCH};

    let socket = UdpSocket::bind("0.0.0.0:0").await?;

    // Build query with a simple timestamp-based ID
    let mut message = Message::new();
    let id = (SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u16)
        ^ (std::process::id() as u16);
    message.set_id(id);
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);

    let name = Name::from_str(name)?;
    let mut query = Query::new();
    query.set_name(name);
    query.set_query_type(RecordType::A);
    message.add_query(query);

    // Send query
    let bytes = message.to_bytes()?;
    socket.send_to(&bytes, server_addr).await?;

    // Receive response
    let mut buf = [0u8; 512];
    let (len, _) = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        socket.recv_from(&mut buf),
    )
    .await??;

    // Parse response
    let response = Message::from_bytes(&buf[..len])?;

    // Extract A record
    for answer in response.answers() {
        if let Some(RData::A(a)) = answer.data() {
            return Ok(Some(a.0));
        }
    }

    Ok(None)
}

//! Network fabric and private service access.

use serde::Serialize;

use super::{Declared, Dependency, ResourceKind};

/// Custom-mode VPC network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Network {
    pub name: String,
    pub project: String,
    pub auto_create_subnetworks: bool,
    pub routing_mode: String,
}

impl Declared for Network {
    const KIND: ResourceKind = ResourceKind::Network;

    fn name(&self) -> &str {
        &self.name
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["auto_create_subnetworks"]
    }
}

/// Regional subnet of [`Network`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subnetwork {
    pub name: String,
    pub project: String,
    pub region: String,
    pub network: String,
    pub ip_cidr_range: String,
    pub private_ip_google_access: bool,
}

impl Declared for Subnetwork {
    const KIND: ResourceKind = ResourceKind::Subnetwork;

    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<Dependency> {
        vec![Dependency::reference(ResourceKind::Network, &self.network)]
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["region", "network", "ip_cidr_range"]
    }
}

/// Cloud router hosting the NAT gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Router {
    pub name: String,
    pub project: String,
    pub region: String,
    pub network: String,
}

impl Declared for Router {
    const KIND: ResourceKind = ResourceKind::Router;

    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<Dependency> {
        vec![Dependency::reference(ResourceKind::Network, &self.network)]
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["region", "network"]
    }
}

/// NAT gateway giving instances without external addresses outbound access.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterNat {
    pub name: String,
    pub project: String,
    pub region: String,
    pub router: String,
    pub nat_ip_allocate_option: String,
    pub source_subnetwork_ip_ranges_to_nat: String,
}

impl Declared for RouterNat {
    const KIND: ResourceKind = ResourceKind::RouterNat;

    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<Dependency> {
        vec![Dependency::reference(ResourceKind::Router, &self.router)]
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["region", "router"]
    }
}

/// Internal address block reserved for peering with managed services.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrivateServiceRange {
    pub name: String,
    pub project: String,
    pub network: String,
    pub purpose: String,
    pub address_type: String,
    pub prefix_length: u8,
}

impl Declared for PrivateServiceRange {
    const KIND: ResourceKind = ResourceKind::PrivateServiceRange;

    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<Dependency> {
        vec![Dependency::reference(ResourceKind::Network, &self.network)]
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["network", "purpose", "address_type", "prefix_length"]
    }
}

/// Peering between the network and the service-networking producer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeeringConnection {
    pub name: String,
    pub project: String,
    pub network: String,
    pub service: String,
    pub reserved_peering_ranges: Vec<String>,
}

impl Declared for PeeringConnection {
    const KIND: ResourceKind = ResourceKind::PeeringConnection;

    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<Dependency> {
        let mut deps = vec![Dependency::reference(ResourceKind::Network, &self.network)];
        deps.extend(
            self.reserved_peering_ranges
                .iter()
                .map(|range| Dependency::reference(ResourceKind::PrivateServiceRange, range)),
        );
        deps
    }

    fn immutable_fields(&self) -> &'static [&'static str] {
        &["network", "service"]
    }
}

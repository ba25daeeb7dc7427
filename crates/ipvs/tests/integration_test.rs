//! Integration tests for IPVS operations.
//!
//! These tests require:
//! - Root privileges (CAP_NET_ADMIN)
//! - IPVS kernel module loaded (modprobe ip_vs)
//! - Set IPVS_TEST_ENABLED=1 environment variable to run
//!
//! Run with: sudo -E cargo test --test integration_test -- --nocapture

use ipvs::{
    Destination, ForwardingMethod, IPVSManager, Protocol, Scheduler, Service, ServiceFlags,
};
use std::net::{IpAddr, Ipv4Addr};

/// Helper to check if tests should run
fn should_run_tests() -> bool {
    std::env::var("IPVS_TEST_ENABLED").is_ok()
}

/// Helper to skip test if not enabled
macro_rules! skip_unless_enabled {
    () => {
        if !should_run_tests() {
            eprintln!("Skipping test (set IPVS_TEST_ENABLED=1 to enable)");
            return;
        }
    };
}

fn tcp_service(address: Ipv4Addr, port: u16, scheduler: Scheduler) -> Service {
    Service {
        address: IpAddr::V4(address),
        protocol: Protocol::TCP,
        port,
        fwmark: 0,
        scheduler,
        flags: ServiceFlags::default(),
        timeout: 0,
        netmask: u32::MAX,
    }
}

fn route_dest(address: Ipv4Addr, port: u16, weight: u32) -> Destination {
    Destination {
        address: IpAddr::V4(address),
        port,
        weight,
        fwd_method: ForwardingMethod::DirectRoute,
        upper_threshold: 0,
        lower_threshold: 0,
    }
}

#[test]
fn test_ipvs_manager_creation() {
    skip_unless_enabled!();

    let manager = IPVSManager::new().expect("Failed to create IPVSManager");
    assert!(manager.family_id() > 0);
    println!("IPVS family ID: {}", manager.family_id());
}

#[test]
fn test_ipvs_info() {
    skip_unless_enabled!();

    let mut manager = IPVSManager::new().expect("Failed to create manager");
    let info = manager.info().expect("Failed to get IPVS info");
    println!("IPVS info: {}", info);
    assert!(info.version.major > 0, "Version major should be > 0");
    assert!(info.conn_tab_size > 0, "Connection table should be sized");
}

#[test]
fn test_service_lifecycle() {
    skip_unless_enabled!();

    let mut manager = IPVSManager::new().expect("Failed to create manager");

    // Clean slate
    manager.flush().expect("Failed to flush");
    assert!(manager.get_services().expect("list").is_empty());

    let service = tcp_service(Ipv4Addr::new(10, 0, 0, 1), 80, Scheduler::RoundRobin);
    manager.add_service(&service).expect("Failed to add service");

    // Update service (change scheduler)
    let mut updated_service = service.clone();
    updated_service.scheduler = Scheduler::WeightedRoundRobin;
    manager
        .update_service(&updated_service)
        .expect("Failed to update service");

    let listed = manager.get_services().expect("Failed to list services");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].key(), service.key());
    assert_eq!(listed[0].scheduler, Scheduler::WeightedRoundRobin);

    // Add a destination and reflect it back
    let dest = route_dest(Ipv4Addr::new(192, 168, 1, 10), 8080, 100);
    manager
        .add_destination(&updated_service, &dest)
        .expect("Failed to add destination");

    let mut updated_dest = dest.clone();
    updated_dest.weight = 200;
    manager
        .update_destination(&updated_service, &updated_dest)
        .expect("Failed to update destination");

    let dests = manager
        .get_destinations(&updated_service)
        .expect("Failed to list destinations");
    assert_eq!(dests.len(), 1);
    assert_eq!(dests[0].key(), dest.key());
    assert_eq!(dests[0].weight, 200);

    manager
        .delete_destination(&updated_service, &updated_dest)
        .expect("Failed to delete destination");
    manager
        .delete_service(&updated_service)
        .expect("Failed to delete service");

    assert!(manager.get_services().expect("list").is_empty());
}

#[test]
fn test_firewall_mark_service() {
    skip_unless_enabled!();

    let mut manager = IPVSManager::new().expect("Failed to create manager");
    manager.flush().expect("Failed to flush");

    let service = Service {
        address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        protocol: Protocol::TCP,
        port: 0,
        fwmark: 100,
        scheduler: Scheduler::LeastConnection,
        flags: ServiceFlags::default(),
        timeout: 0,
        netmask: u32::MAX,
    };

    manager
        .add_service(&service)
        .expect("Failed to add fwmark service");

    let listed = manager.get_services().expect("Failed to list services");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].fwmark, 100);

    manager
        .delete_service(&service)
        .expect("Failed to delete service");
}

#[test]
fn test_udp_service() {
    skip_unless_enabled!();

    let mut manager = IPVSManager::new().expect("Failed to create manager");
    manager.flush().expect("Failed to flush");

    let mut service = tcp_service(Ipv4Addr::new(10, 0, 0, 2), 53, Scheduler::SourceHashing);
    service.protocol = Protocol::UDP;

    manager.add_service(&service).expect("Failed to add UDP service");
    manager.delete_service(&service).expect("Failed to delete service");
}

#[test]
fn test_multiple_destinations() {
    skip_unless_enabled!();

    let mut manager = IPVSManager::new().expect("Failed to create manager");
    manager.flush().expect("Failed to flush");

    let service = tcp_service(
        Ipv4Addr::new(10, 0, 0, 3),
        443,
        Scheduler::WeightedLeastConnection,
    );
    manager.add_service(&service).expect("Failed to add service");

    for i in 1..=3u8 {
        let dest = route_dest(Ipv4Addr::new(192, 168, 1, 10 + i), 8443, 100 * i as u32);
        manager
            .add_destination(&service, &dest)
            .unwrap_or_else(|e| panic!("Failed to add destination {}: {}", i, e));
    }

    let dests = manager
        .get_destinations(&service)
        .expect("Failed to list destinations");
    assert_eq!(dests.len(), 3);

    manager.delete_service(&service).expect("Failed to delete service");
}

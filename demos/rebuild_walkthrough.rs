use kafka_placement::*;

fn main() {
    println!("Kafka Partition Placement - Example Usage\n");

    // A small cluster: four brokers across three racks, one of which
    // (1003) is being decommissioned.
    let mut brokers = BrokerMap::new();
    for (id, rack, used, storage_free) in [
        (1001, "a", 2, 500.0),
        (1002, "b", 2, 750.0),
        (1003, "c", 2, 300.0),
        (1004, "d", 0, 1200.0),
        (1005, "e", 0, 950.0),
    ] {
        brokers.insert(Broker {
            id,
            locality: rack.to_string(),
            used,
            storage_free,
            ..Default::default()
        });
    }
    if let Some(b) = brokers.get_mut(1003) {
        b.replace = true;
    }

    let map_json = r#"{"version":1,"partitions":[
        {"topic":"events","partition":0,"replicas":[1001,1002,1003]},
        {"topic":"events","partition":1,"replicas":[1002,1003,1001]}]}"#;
    let pm = PartitionMap::from_json(map_json).expect("valid topic map");

    println!("=== Rebuilding around broker 1003 (count strategy) ===");
    let (rebuilt, errs) = pm.rebuild(&brokers, &PartitionMetaMap::new(), PlacementStrategy::Count);

    for p in &rebuilt.partitions {
        let replicas: Vec<String> = p.replicas.iter().map(|r| r.to_string()).collect();
        println!("  {} p{} -> [{}]", p.topic, p.partition, replicas.join(", "));
    }
    for e in &errs {
        println!("  soft error: {}", e);
    }

    println!("\n=== Leader/follower spread ===");
    for (id, stats) in rebuilt.use_stats() {
        println!(
            "  broker {}: {} leader, {} follower",
            id, stats.leader, stats.follower
        );
    }

    // Rebalance the same cluster by storage: offload the brokers
    // furthest below the harmonic mean of free storage.
    let mut meta = PartitionMetaMap::new();
    meta.set("events", 0, 80.0);
    meta.set("events", 1, 120.0);

    println!("\n=== Storage rebalance ===");
    println!(
        "  free storage mean {:.1}, harmonic mean {:.1}",
        brokers.mean(),
        brokers.h_mean()
    );

    let mut rebalancer = Rebalancer::new(
        &rebuilt,
        brokers,
        meta,
        RebalanceParams {
            storage_threshold: 0.20,
            tolerance: 0.25,
            optimize_leaders: true,
            ..Default::default()
        },
    );

    let moved = rebalancer.run();
    println!("  {} relocation(s) planned", moved);

    for (source, relos) in rebalancer.relocations() {
        for r in relos {
            println!(
                "    {} p{}: {} -> {}",
                r.partition.topic, r.partition.partition, source, r.destination
            );
        }
    }

    let mut balanced = rebuilt.clone();
    rebalancer.apply(&mut balanced);

    println!("\n=== Final map ===");
    println!("{}", balanced.to_json().expect("serializable map"));
}

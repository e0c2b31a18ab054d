//! End-to-end scenarios against real `redis-server` processes.
//!
//! Ignored by default; run with `cargo test -- --ignored` on a machine with
//! `redis-server` on the PATH. Ports 16379-16381 and 12100-12102 must be free.

mod common;

use common::{strings, wait_until};
use once_cell::sync::Lazy;
use redis_failover::common::{ClusterState, Config, RaftConfig};
use redis_failover::store::{probe_group, RedisStore, Role, Store};
use redis_failover::App;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

const PORTS: [u16; 3] = [16379, 16380, 16381];

// every scenario uses the same redis ports
static SERIAL: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

fn addr(port: u16) -> String {
    format!("127.0.0.1:{}", port)
}

fn client() -> RedisStore {
    RedisStore::new(Duration::from_secs(1))
}

struct RedisServer {
    port: u16,
    child: Option<Child>,
}

impl RedisServer {
    async fn start(port: u16) -> Self {
        let port_arg = port.to_string();
        let _ = Command::new("redis-cli")
            .args(["-p", port_arg.as_str(), "shutdown", "nosave"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        let child = Command::new("redis-server")
            .args(["--port", port_arg.as_str(), "--save", "", "--appendonly", "no"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("redis-server must be installed");

        let store = client();
        let mut ready = false;
        for _ in 0..50 {
            if store.role(&addr(port)).await.is_ok() {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(ready, "redis-server on {} not ready after 10s", port);
        store.command(&addr(port), &["SLAVEOF", "NO", "ONE"]).await.unwrap();
        store.command(&addr(port), &["FLUSHALL"]).await.unwrap();

        Self {
            port,
            child: Some(child),
        }
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for RedisServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn single_config(masters: &[String]) -> Config {
    Config {
        addr: "127.0.0.1:0".parse().unwrap(),
        masters: masters.to_vec(),
        check_interval_ms: 500,
        ..Default::default()
    }
}

fn before_channel(app: &App) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    app.add_before_failover_handler(move |down| {
        let _ = tx.send(down.to_string());
        Ok(())
    });
    rx
}

async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>, secs: u64) -> Option<T> {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Point the second and third servers at the first and wait for them to sync.
async fn build_repl_topo() {
    let store = client();
    let master = addr(PORTS[0]);
    let master_port = PORTS[0].to_string();
    for port in &PORTS[1..] {
        store
            .command(&addr(*port), &["SLAVEOF", "127.0.0.1", master_port.as_str()])
            .await
            .unwrap();
    }
    store.command(&master, &["SET", "a", "10"]).await.unwrap();
    store.command(&master, &["SET", "b", "20"]).await.unwrap();

    for port in &PORTS[1..] {
        let mut connected = false;
        for _ in 0..20 {
            if let Ok(Role::Replica { state, .. }) = store.role(&addr(*port)).await {
                if state.is_live() {
                    connected = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert!(connected, "{} never connected to its master", port);
    }

    let mut synced = false;
    for _ in 0..20 {
        let group = probe_group(&store, &master).await.unwrap();
        if group.replicas.len() == 2 && group.is_synced() {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    assert!(synced, "replicas did not catch up with {}", master);

    for port in &PORTS[1..] {
        let value = store.command(&addr(*port), &["GET", "a"]).await.unwrap();
        assert_eq!(value.as_str(), Some("10"));
    }
}

#[tokio::test]
#[ignore]
async fn simple_check() {
    let _serial = SERIAL.lock().await;
    let mut master = RedisServer::start(PORTS[0]).await;
    let master_addr = addr(master.port);

    let app = App::new(single_config(&[master_addr.clone()])).await.unwrap();
    let mut down = before_channel(&app);
    app.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || app.get_masters() == vec![master_addr.clone()]).await);

    let store = client();
    store.command(&master_addr, &["SET", "a", "1"]).await.unwrap();
    let value = store.command(&master_addr, &["GET", "a"]).await.unwrap();
    assert_eq!(value.as_str(), Some("1"));

    master.stop();
    let fired = recv_within(&mut down, 5).await;
    assert_eq!(fired.as_deref(), Some(master_addr.as_str()), "check is not ok after 5s");
    app.close().await;
}

#[tokio::test]
#[ignore]
async fn failover_check() {
    let _serial = SERIAL.lock().await;
    let mut master = RedisServer::start(PORTS[0]).await;
    let _replica_a = RedisServer::start(PORTS[1]).await;
    let _replica_b = RedisServer::start(PORTS[2]).await;
    let master_addr = addr(master.port);

    let app = App::new(single_config(&[master_addr.clone()])).await.unwrap();
    let (tx, mut promoted) = mpsc::unbounded_channel();
    app.add_after_failover_handler(move |_, new| {
        let _ = tx.send(new.to_string());
        Ok(())
    });
    app.start().await.unwrap();

    build_repl_topo().await;
    master.stop();

    let new_master = recv_within(&mut promoted, 5)
        .await
        .expect("failover is not ok after 5s");
    assert!(new_master == addr(PORTS[1]) || new_master == addr(PORTS[2]));
    app.barrier(Duration::from_secs(5)).await.unwrap();
    assert_eq!(app.get_masters(), vec![new_master.clone()]);

    let store = client();
    assert!(matches!(store.role(&new_master).await.unwrap(), Role::Master { .. }));
    app.close().await;
}

fn cluster_config(dir: &TempDir, cluster: &[String], i: usize) -> Config {
    Config {
        addr: "127.0.0.1:0".parse().unwrap(),
        check_interval_ms: 500,
        raft: RaftConfig {
            addr: cluster[i].clone(),
            data_dir: dir.path().join(format!("store/{}", i)),
            log_dir: dir.path().join(format!("log/{}", i)),
            cluster: cluster.to_vec(),
            cluster_state: ClusterState::New,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn one_raft_failover_check() {
    let _serial = SERIAL.lock().await;
    let mut master = RedisServer::start(PORTS[0]).await;
    let master_addr = addr(master.port);
    let dir = TempDir::new().unwrap();
    let cluster = strings(&["127.0.0.1:12100"]);

    let app = App::new(cluster_config(&dir, &cluster, 0)).await.unwrap();
    app.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || app.is_leader()).await,
        "elect to leader failed after 5s"
    );

    app.add_masters(&[master_addr.clone()]).await.unwrap();
    let mut down = before_channel(&app);
    assert_eq!(app.get_masters(), vec![master_addr.clone()]);

    master.stop();
    assert_eq!(recv_within(&mut down, 5).await.as_deref(), Some(master_addr.as_str()));
    app.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn multi_raft_failover_check() {
    let _serial = SERIAL.lock().await;
    let mut master = RedisServer::start(PORTS[0]).await;
    let master_addr = addr(master.port);
    let dir = TempDir::new().unwrap();
    let cluster = strings(&["127.0.0.1:12100", "127.0.0.1:12101", "127.0.0.1:12102"]);

    let mut apps = Vec::new();
    for i in 0..cluster.len() {
        let app = App::new(cluster_config(&dir, &cluster, i)).await.unwrap();
        app.start().await.unwrap();
        apps.push(app);
    }

    assert!(
        wait_until(Duration::from_secs(5), || apps.iter().filter(|a| a.is_leader()).count() == 1)
            .await,
        "can not elect a leader after 5s"
    );
    let leader = apps.iter().position(|a| a.is_leader()).unwrap();

    apps[leader].add_masters(&[master_addr.clone()]).await.unwrap();
    let mut down = before_channel(&apps[leader]);
    assert_eq!(apps[leader].get_masters(), vec![master_addr.clone()]);

    master.stop();
    assert_eq!(recv_within(&mut down, 5).await.as_deref(), Some(master_addr.as_str()));
    apps[leader].barrier(Duration::from_secs(5)).await.unwrap();

    // close the leader; the other two take over
    let old = apps.remove(leader);
    old.close().await;
    let mut master = RedisServer::start(PORTS[0]).await;

    assert!(
        wait_until(Duration::from_secs(5), || apps.iter().filter(|a| a.is_leader()).count() == 1)
            .await,
        "can not elect a new leader after 5s"
    );
    let leader = apps.iter().position(|a| a.is_leader()).unwrap();

    apps[leader].add_masters(&[master_addr.clone()]).await.unwrap();
    let mut down = before_channel(&apps[leader]);
    assert_eq!(apps[leader].get_masters(), vec![master_addr.clone()]);

    master.stop();
    assert_eq!(recv_within(&mut down, 5).await.as_deref(), Some(master_addr.as_str()));

    for app in &apps {
        app.close().await;
    }
}

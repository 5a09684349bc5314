//! Read-only HTTP view of the collector: liveness, JSON snapshot and a
//! Prometheus text rendering of the same snapshot.

use crate::collectors::{MetricsCollector, Snapshot};
use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    body::Incoming, header, header::HeaderValue, server::conn::http1, service::service_fn, Method,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use std::{convert::Infallible, fmt::Write as _, net::SocketAddr, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, warn};

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";
const PROMETHEUS: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Binds `addr` and serves in the background. Returns the bound address,
/// which differs from `addr` when port 0 was asked for.
pub async fn spawn_status_server(
    addr: SocketAddr,
    collector: MetricsCollector,
    collect_timeout: Duration,
) -> Result<SocketAddr> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding status server on {addr}"))?;
    let local = listener.local_addr().context("status server address")?;
    info!(addr = %local, "status server listening");
    tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = ?e, "status accept failed");
                    continue;
                }
            };
            let collector = collector.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req: Request<Incoming>| {
                    let collector = collector.clone();
                    async move {
                        Ok::<_, Infallible>(
                            route(req.method(), req.uri().path(), &collector, collect_timeout).await,
                        )
                    }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await
                {
                    warn!(error = ?e, %peer, "status conn error");
                }
            });
        }
    });
    Ok(local)
}

pub async fn route(
    method: &Method,
    path: &str,
    collector: &MetricsCollector,
    collect_timeout: Duration,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/healthz") => respond(StatusCode::OK, TEXT, "ok"),
        (&Method::GET, "/api/stats") => match collector.collect_within(collect_timeout).await {
            Some(snap) => match serde_json::to_vec(&snap) {
                Ok(body) => respond(StatusCode::OK, JSON, body),
                Err(e) => {
                    warn!(error = %e, "snapshot serialization failed");
                    respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        JSON,
                        r#"{"error":"serialization failed"}"#,
                    )
                }
            },
            None => timed_out(collect_timeout),
        },
        (&Method::GET, "/metrics") => match collector.collect_within(collect_timeout).await {
            Some(snap) => respond(StatusCode::OK, PROMETHEUS, render_prometheus(&snap)),
            None => timed_out(collect_timeout),
        },
        (_, "/healthz" | "/api/stats" | "/metrics") => {
            respond(StatusCode::METHOD_NOT_ALLOWED, TEXT, "method not allowed")
        }
        _ => respond(StatusCode::NOT_FOUND, TEXT, "not found"),
    }
}

fn timed_out(after: Duration) -> Response<Full<Bytes>> {
    warn!(timeout_ms = after.as_millis() as u64, "collection timed out");
    respond(
        StatusCode::GATEWAY_TIMEOUT,
        JSON,
        r#"{"error":"collection timed out"}"#,
    )
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

/// Renders one snapshot as Prometheus gauges. Unmeasured disks only get
/// `host_disk_present`; the sentinel zeros of cpu and memory are exported
/// as they are.
pub fn render_prometheus(snap: &Snapshot) -> String {
    let mut out = String::new();
    let gauge = |out: &mut String, name: &str, help: &str| {
        let _ = writeln!(out, "# HELP {name} {help}\n# TYPE {name} gauge");
    };

    gauge(&mut out, "host_cpu_percent", "CPU utilization over the sampling interval.");
    let _ = writeln!(out, "host_cpu_percent {}", snap.cpu.pct);
    gauge(&mut out, "host_memory_total_mb", "Total memory in megabytes.");
    let _ = writeln!(out, "host_memory_total_mb {}", snap.memory.total_mb);
    gauge(&mut out, "host_memory_used_mb", "Used memory in megabytes.");
    let _ = writeln!(out, "host_memory_used_mb {}", snap.memory.used_mb);
    gauge(&mut out, "host_memory_percent", "Used share of total memory.");
    let _ = writeln!(out, "host_memory_percent {}", snap.memory.pct);

    gauge(&mut out, "host_disk_present", "1 if the mount path exists under the host root.");
    for (path, entry) in snap.disk.iter() {
        let _ = writeln!(out, "host_disk_present{{path=\"{}\"}} {}", escape(path), u8::from(entry.exists));
    }
    gauge(&mut out, "host_disk_used_percent", "Used share of the filesystem.");
    for (path, entry) in snap.disk.iter() {
        if let Some(pct) = entry.used_pct {
            let _ = writeln!(out, "host_disk_used_percent{{path=\"{}\"}} {pct}", escape(path));
        }
    }

    gauge(&mut out, "host_process_rss_mb", "Resident memory of the top processes.");
    for p in &snap.top_processes {
        let _ = writeln!(
            out,
            "host_process_rss_mb{{pid=\"{}\",name=\"{}\"}} {}",
            p.pid,
            escape(&p.name),
            p.rss_mb
        );
    }
    out
}

fn escape(label: &str) -> String {
    label
        .replace('\\', r"\\")
        .replace('"', r#"\""#)
        .replace('\n', r"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collectors::{CpuSnapshot, DiskEntry, DiskStats, MemorySnapshot, ProcessEntry},
        config::Sources,
    };
    use http_body_util::BodyExt;
    use std::{fs, path::Path};
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn collector(root: &Path) -> MetricsCollector {
        let proc_root = root.join("proc");
        fs::create_dir_all(&proc_root).unwrap();
        fs::write(
            proc_root.join("meminfo"),
            "MemTotal: 1048576 kB\nMemAvailable: 524288 kB\n",
        )
        .unwrap();
        MetricsCollector::new(Sources {
            proc_root,
            host_root: root.join("root"),
            disk_paths: vec!["/mnt/data".into()],
            cpu_sample_interval_ms: 1,
            ..Sources::default()
        })
    }

    async fn body_json(resp: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn stats_route_serves_snapshot_json() {
        let dir = tempdir().unwrap();
        let resp = route(&Method::GET, "/api/stats", &collector(dir.path()), Duration::from_secs(5)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], JSON);
        let v = body_json(resp).await;
        assert_eq!(v["memory"]["pct"], 50.0);
        assert_eq!(v["cpu"]["pct"], 0.0);
        assert_eq!(v["disk"]["/mnt/data"], serde_json::json!({"used_pct": null, "exists": false}));
        assert_eq!(v["top_processes"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn unknown_paths_and_methods_are_rejected() {
        let dir = tempdir().unwrap();
        let c = collector(dir.path());
        let t = Duration::from_secs(5);
        assert_eq!(route(&Method::GET, "/nope", &c, t).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            route(&Method::POST, "/api/stats", &c, t).await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(route(&Method::GET, "/healthz", &c, t).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn slow_collection_maps_to_gateway_timeout() {
        let dir = tempdir().unwrap();
        let mut sources = collector(dir.path()).sources().clone();
        sources.cpu_sample_interval_ms = 300;
        let resp = route(
            &Method::GET,
            "/api/stats",
            &MetricsCollector::new(sources),
            Duration::from_millis(10),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_json(resp).await["error"], "collection timed out");
    }

    #[test]
    fn prometheus_skips_unmeasured_disks() {
        let snap = Snapshot {
            cpu: CpuSnapshot { pct: 12.5 },
            memory: MemorySnapshot {
                total_mb: 1024.0,
                used_mb: 512.0,
                pct: 50.0,
            },
            disk: DiskStats::from_iter([
                (
                    "/".to_string(),
                    DiskEntry {
                        used_pct: Some(41.2),
                        exists: true,
                    },
                ),
                ("/mnt/data".to_string(), DiskEntry::ABSENT),
            ]),
            top_processes: vec![ProcessEntry {
                pid: 7,
                name: "we\"ird".into(),
                rss_mb: 3.5,
            }],
        };
        let text = render_prometheus(&snap);
        assert!(text.contains("host_cpu_percent 12.5\n"));
        assert!(text.contains("host_memory_percent 50\n"));
        assert!(text.contains("host_disk_used_percent{path=\"/\"} 41.2\n"));
        assert!(!text.contains("host_disk_used_percent{path=\"/mnt/data\"}"));
        assert!(text.contains("host_disk_present{path=\"/mnt/data\"} 0\n"));
        assert!(text.contains("host_process_rss_mb{pid=\"7\",name=\"we\\\"ird\"} 3.5\n"));
    }

    #[tokio::test]
    async fn server_answers_over_tcp() {
        let dir = tempdir().unwrap();
        let addr = spawn_status_server(
            "127.0.0.1:0".parse().unwrap(),
            collector(dir.path()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK"));
        assert!(reply.ends_with("ok"));
    }
}

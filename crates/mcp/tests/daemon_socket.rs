#![forbid(unsafe_code)]

#[cfg(unix)]
mod support;

#[cfg(unix)]
mod unix {
    use super::support::*;
    use serde_json::json;
    use std::io::BufReader;
    use std::time::Duration;

    const SETTLE: Duration = Duration::from_secs(5);

    #[test]
    fn daemon_answers_health_and_info() {
        let Some(sandbox) = Sandbox::new() else {
            return;
        };
        let mut daemon = sandbox.spawn_daemon();

        let health = sandbox.rpc("health_check");
        assert_eq!(health["id"], 1);
        assert_eq!(health["result"]["status"], "ok");

        let info = sandbox.rpc("backend_info");
        assert_eq!(info["result"]["pid"], daemon.id());
        assert_eq!(
            info["result"]["socket"],
            &*sandbox.socket_path().to_string_lossy()
        );
        assert_eq!(
            info["result"]["data_file"],
            &*sandbox.data_file().to_string_lossy()
        );
        assert!(info["result"]["started_at"].is_string());
        assert!(info["result"]["uptime_ms"].is_u64());

        kill_quietly(&mut daemon);
    }

    #[test]
    fn notifications_get_no_reply_and_connection_stays_usable() {
        let Some(sandbox) = Sandbox::new() else {
            return;
        };
        let mut daemon = sandbox.spawn_daemon();

        let stream = wait_for_socket(&sandbox.socket_path());
        let mut reader = BufReader::new(stream);
        send_frame(
            reader.get_mut(),
            json!({ "jsonrpc": "2.0", "method": "health_check" }),
        );
        send_frame(
            reader.get_mut(),
            json!({ "jsonrpc": "2.0", "id": 9, "method": "nope" }),
        );
        let resp = recv_frame(&mut reader);
        assert_eq!(resp["id"], 9);
        assert_eq!(resp["error"]["code"], -32601);

        kill_quietly(&mut daemon);
    }

    #[test]
    fn invalid_body_without_id_does_not_shift_replies() {
        let Some(sandbox) = Sandbox::new() else {
            return;
        };
        let mut daemon = sandbox.spawn_daemon();

        let stream = wait_for_socket(&sandbox.socket_path());
        let mut reader = BufReader::new(stream);
        send_frame(reader.get_mut(), json!({ "jsonrpc": "2.0", "foo": 1 }));
        send_frame(
            reader.get_mut(),
            json!({ "jsonrpc": "2.0", "id": 9, "method": "health_check" }),
        );
        let resp = recv_frame(&mut reader);
        assert_eq!(resp["id"], 9);
        assert_eq!(resp["result"]["status"], "ok");

        kill_quietly(&mut daemon);
    }

    #[test]
    fn daemon_exits_when_socket_is_unlinked() {
        let Some(sandbox) = Sandbox::new() else {
            return;
        };
        let mut daemon = sandbox.spawn_daemon();
        let _stream = wait_for_socket(&sandbox.socket_path());

        std::fs::remove_file(sandbox.socket_path()).expect("unlink socket path");

        match wait_for_exit(&mut daemon, SETTLE) {
            Some(status) => assert!(status.success(), "daemon exited with error: {status}"),
            None => {
                kill_quietly(&mut daemon);
                panic!("daemon did not exit after socket unlink");
            }
        }
    }

    #[test]
    fn second_daemon_defers_to_a_live_one() {
        let Some(sandbox) = Sandbox::new() else {
            return;
        };
        let mut first = sandbox.spawn_daemon();
        let _stream = wait_for_socket(&sandbox.socket_path());

        let mut second = sandbox.spawn_daemon();
        let status = wait_for_exit(&mut second, SETTLE).expect("second daemon exit");
        assert!(status.success());
        assert_eq!(sandbox.backend_pid(), first.id());

        kill_quietly(&mut first);
    }

    #[test]
    fn shutdown_request_removes_socket_and_exits() {
        let Some(sandbox) = Sandbox::new() else {
            return;
        };
        let mut daemon = sandbox.spawn_daemon();

        let resp = sandbox.rpc("backend_shutdown");
        assert_eq!(resp["result"]["ok"], true);
        let status = wait_for_exit(&mut daemon, SETTLE).expect("daemon exit");
        assert!(status.success());
        assert!(!sandbox.endpoint_exists());
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use parley::{Client, Error, Server, Service, WireError};

struct EchoService;

fn echo_service() -> Service {
    Service::build(EchoService)
        .method(
            "Method2",
            |_: &EchoService, args: &String, reply: &mut String| {
                reply.clone_from(args);
                Ok(())
            },
        )
        .finish()
}

struct Arith;

fn arith_service() -> Service {
    Service::build(Arith)
        .method("add", |_: &Arith, args: &(u32, u32), reply: &mut u32| {
            *reply = args.0 + args.1;
            Ok(())
        })
        .method("div", |_: &Arith, args: &(u32, u32), reply: &mut u32| {
            if args.1 == 0 {
                return Err("division by zero".into());
            }
            *reply = args.0 / args.1;
            Ok(())
        })
        .finish()
}

fn start_server(addr: (&str, u16)) -> (Server, parley::ServerInstance) {
    let server = Server::new();
    server.register(echo_service());
    server.register(arith_service());
    let instance = server.start(addr).unwrap();
    (server, instance)
}

#[test]
fn echo_round_trip() {
    let addr = ("127.0.0.1", 4401);
    let (_server, _instance) = start_server(addr);

    let client = Client::connect(addr).unwrap();
    let reply: String = client
        .call("EchoService.Method2", &"ping".to_string())
        .unwrap();
    assert_eq!(reply, "ping");
}

#[test]
fn unknown_service_is_reported_in_band() {
    let addr = ("127.0.0.1", 4402);
    let (_server, _instance) = start_server(addr);
    let client = Client::connect(addr).unwrap();

    let err = client
        .call::<String, String>("Foo.Bar", &"x".to_string())
        .unwrap_err();
    match err {
        Error::Server(WireError::UnknownService(target)) => assert_eq!(target, "Foo.Bar"),
        other => panic!("unexpected error: {other:?}"),
    }

    // the connection survives a failed request
    let reply: String = client
        .call("EchoService.Method2", &"still alive".to_string())
        .unwrap();
    assert_eq!(reply, "still alive");
}

#[test]
fn unknown_method_is_reported_in_band() {
    let addr = ("127.0.0.1", 4403);
    let (_server, _instance) = start_server(addr);
    let client = Client::connect(addr).unwrap();

    let err = client
        .call::<String, String>("EchoService.Nope", &"x".to_string())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Server(WireError::UnknownMethod(target)) if target == "EchoService.Nope"
    ));
}

#[test]
fn dotless_target_is_rejected_in_band() {
    let addr = ("127.0.0.1", 4404);
    let (_server, _instance) = start_server(addr);
    let client = Client::connect(addr).unwrap();

    let err = client
        .call::<String, String>("nodot", &"x".to_string())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Server(WireError::InvalidServiceMethod(_))
    ));
}

#[test]
fn method_error_reaches_the_caller() {
    let addr = ("127.0.0.1", 4405);
    let (_server, _instance) = start_server(addr);
    let client = Client::connect(addr).unwrap();

    let err = client.call::<(u32, u32), u32>("Arith.div", &(1, 0)).unwrap_err();
    match err {
        Error::Server(WireError::Method(msg)) => assert_eq!(msg, "division by zero"),
        other => panic!("unexpected error: {other:?}"),
    }

    let quotient: u32 = client.call("Arith.div", &(6, 3)).unwrap();
    assert_eq!(quotient, 2);
}

#[test]
fn futures_complete_out_of_waiting_order() {
    let addr = ("127.0.0.1", 4406);
    let (_server, _instance) = start_server(addr);
    let client = Client::connect(addr).unwrap();

    let calls: Vec<_> = (0..8u32)
        .map(|i| {
            client
                .go::<String, String>("EchoService.Method2", &format!("msg {i}"))
                .unwrap()
        })
        .collect();

    // waiting in reverse still routes every reply to its own call
    for (i, call) in calls.into_iter().enumerate().rev() {
        assert_eq!(call.service_method(), "EchoService.Method2");
        assert_eq!(call.wait().unwrap(), format!("msg {i}"));
    }
}

#[test]
fn concurrent_calls_route_to_their_callers() {
    let addr = ("127.0.0.1", 4407);
    let (_server, _instance) = start_server(addr);
    let client = Arc::new(Client::connect(addr).unwrap());

    let handles: Vec<_> = (0..8u32)
        .map(|i| {
            let client = client.clone();
            may::go!(move || {
                for j in 0..50u32 {
                    let sum: u32 = client.call("Arith.add", &(i, j)).unwrap();
                    assert_eq!(sum, i + j);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn issuing_a_call_does_not_wait_for_it() {
    struct Slow;

    let addr = ("127.0.0.1", 4408);
    let server = Server::new();
    server.register(
        Service::build(Slow)
            .method("nap", |_: &Slow, _: &(), reply: &mut String| {
                may::coroutine::sleep(Duration::from_millis(1500));
                *reply = "rested".to_owned();
                Ok(())
            })
            .finish(),
    );
    let _instance = server.start(addr).unwrap();
    let client = Client::connect(addr).unwrap();

    let issued = Instant::now();
    let call = client.go::<(), String>("Slow.nap", &()).unwrap();
    assert!(issued.elapsed() < Duration::from_millis(1000));

    assert_eq!(call.wait().unwrap(), "rested");
}

#[test]
fn server_teardown_fails_pending_calls() {
    struct Slow;

    let addr = ("127.0.0.1", 4409);
    let server = Server::new();
    server.register(
        Service::build(Slow)
            .method("nap", |_: &Slow, _: &(), _: &mut String| {
                may::coroutine::sleep(Duration::from_secs(10));
                Ok(())
            })
            .finish(),
    );
    let instance = server.start(addr).unwrap();
    let client = Client::connect(addr).unwrap();

    let call = client.go::<(), String>("Slow.nap", &()).unwrap();
    // let the request land before tearing the server down
    std::thread::sleep(Duration::from_millis(300));
    drop(instance);

    assert!(matches!(call.wait(), Err(Error::ConnectionClosed)));

    // new calls on the dead connection fail fast instead of hanging
    assert!(client.call::<(), String>("Slow.nap", &()).is_err());
}

#[test]
fn re_registration_overwrites_a_service() {
    struct Shout;

    let addr = ("127.0.0.1", 4410);
    let (server, _instance) = start_server(addr);
    let client = Client::connect(addr).unwrap();

    let reply: String = client
        .call("EchoService.Method2", &"ping".to_string())
        .unwrap();
    assert_eq!(reply, "ping");

    // registration may race with live connections; same name wins
    server.register(
        Service::build(Shout)
            .named("EchoService")
            .method(
                "Method2",
                |_: &Shout, args: &String, reply: &mut String| {
                    *reply = args.to_uppercase();
                    Ok(())
                },
            )
            .finish(),
    );

    let reply: String = client
        .call("EchoService.Method2", &"ping".to_string())
        .unwrap();
    assert_eq!(reply, "PING");
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Point {
    x: i32,
    y: i32,
}

#[test]
fn struct_arguments_and_replies_round_trip() {
    struct Geometry;

    let addr = ("127.0.0.1", 4411);
    let server = Server::new();
    server.register(
        Service::build(Geometry)
            .method(
                "midpoint",
                |_: &Geometry, args: &(Point, Point), reply: &mut Point| {
                    reply.x = (args.0.x + args.1.x) / 2;
                    reply.y = (args.0.y + args.1.y) / 2;
                    Ok(())
                },
            )
            .finish(),
    );
    let _instance = server.start(addr).unwrap();
    let client = Client::connect(addr).unwrap();

    let mid: Point = client
        .call(
            "Geometry.midpoint",
            &(Point { x: 0, y: 0 }, Point { x: 10, y: 4 }),
        )
        .unwrap();
    assert_eq!(mid, Point { x: 5, y: 2 });
}

#[cfg(unix)]
#[test]
fn serves_over_a_unix_stream() {
    use may::os::unix::net::{UnixListener, UnixStream};

    let path = std::env::temp_dir().join("parley-rpc-test.sock");
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).unwrap();

    let server = Server::new();
    server.register(echo_service());
    let handle = may::go!(move || {
        if let Ok((stream, _)) = listener.accept() {
            server.serve_stream(stream);
        }
    });

    let client = Client::new(UnixStream::connect(&path).unwrap()).unwrap();
    let reply: String = client
        .call("EchoService.Method2", &"over unix".to_string())
        .unwrap();
    assert_eq!(reply, "over unix");

    // dropping the client closes the stream and ends the serve loop
    drop(client);
    handle.join().ok();
    let _ = std::fs::remove_file(&path);
}

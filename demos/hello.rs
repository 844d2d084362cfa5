use parley::{Client, Server, Service};

struct Greeter;

fn main() {
    env_logger::init();

    let server = Server::new();
    server.register(
        Service::build(Greeter)
            .method("hello", |_: &Greeter, name: &String, reply: &mut String| {
                *reply = format!("Hello, {name}!");
                Ok(())
            })
            .method("add", |_: &Greeter, args: &(u32, u32), reply: &mut u32| {
                *reply = args.0 + args.1;
                Ok(())
            })
            .finish(),
    );

    let addr = ("127.0.0.1", 4000);
    let _instance = server.start(addr).unwrap();
    let client = Client::connect(addr).unwrap();

    for i in 0..10 {
        let data: Result<String, _> = client.call("Greeter.hello", &format!("World {i}"));
        println!("recv = {:?}", data);
    }

    for i in 0..10u32 {
        let data: Result<u32, _> = client.call("Greeter.add", &(i, i));
        println!("recv = {:?}", data);
    }

    // a miss is answered in-band, the connection stays usable
    let data: Result<String, _> = client.call("Greeter.nope", &"x".to_string());
    println!("recv = {:?}", data);
}

use std::{
    fmt,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use client::Client;
use common::{
    channel::is_disconnect,
    transport::{Connector, Listener},
    Channel, ChannelConfig, Entity, TypeRegistry, Value,
};
use host::{Host, HostConfig, HostHandle};

use crate::person::Person;

enum ClientEvent {
    Reply { latency: Duration },
    Finished { client: usize },
}

pub struct Report {
    pub requests: usize,
    pub elapsed: Duration,
    pub max_latency: Duration,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests in {:?} (max latency {:?})",
            self.requests, self.elapsed, self.max_latency
        )
    }
}

/// Runs a greeting host and a set of concurrent clients against it.
pub struct TestRunner<C: Connector> {
    host: HostHandle,
    client: Arc<Client<C>>,
}

impl<C: Connector + 'static> TestRunner<C> {
    pub fn new(listener: impl Listener + 'static, connector: C) -> anyhow::Result<Self> {
        let host_types = Arc::new(TypeRegistry::with_types([(*Person::descriptor()).clone()])?);
        let host = Host::new(listener, host_types, HostConfig::default(), greet).spawn();

        // Clients learn Person from the host's type dictionary or register it on first send
        let client = Client::new(connector, Arc::new(TypeRegistry::new()), ChannelConfig::default());

        Ok(Self {
            host,
            client: Arc::new(client),
        })
    }

    pub fn run(self, clients: usize, requests_per_client: usize) -> anyhow::Result<Report> {
        let (event_snd, event_rcv) = crossbeam_channel::unbounded();
        let start = Instant::now();

        let join_handles = (0..clients)
            .map(|client_index| {
                let client = self.client.clone();
                let event_snd = event_snd.clone();
                thread::spawn(move || -> anyhow::Result<()> {
                    let mut rng = rand::thread_rng();
                    let mut channel = client.connect().context("Failed to connect")?;

                    for _ in 0..requests_per_client {
                        let person = Person::random(&mut rng);
                        let sent = Instant::now();
                        let reply = channel.request(&person.to_value()?)?;

                        let expected = person.greeting();
                        anyhow::ensure!(
                            reply.as_text() == Some(expected.as_str()),
                            "Unexpected reply {:?}, expected {:?}",
                            reply,
                            expected
                        );

                        event_snd
                            .send(ClientEvent::Reply {
                                latency: sent.elapsed(),
                            })
                            .ok();
                    }

                    channel.close();
                    event_snd
                        .send(ClientEvent::Finished {
                            client: client_index,
                        })
                        .ok();
                    Ok(())
                })
            })
            .collect::<Vec<_>>();
        drop(event_snd);

        let mut requests = 0;
        let mut max_latency = Duration::ZERO;
        for event in event_rcv {
            match event {
                ClientEvent::Reply { latency } => {
                    requests += 1;
                    max_latency = max_latency.max(latency);
                }
                ClientEvent::Finished { client } => {
                    tracing::debug!("Client {} finished", client);
                }
            }
        }

        for handle in join_handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("Client thread panicked"))??;
        }

        let elapsed = start.elapsed();
        self.host.stop();

        Ok(Report {
            requests,
            elapsed,
            max_latency,
        })
    }
}

/// Greets every person received on the channel until the client hangs up.
fn greet(channel: &mut Channel) -> anyhow::Result<()> {
    loop {
        let value = match channel.receive() {
            Ok(value) => value,
            Err(err) if is_disconnect(&err) => return Ok(()),
            Err(err) => return Err(err).context("Failed to receive"),
        };

        let person = Person::from_value(&value)?;
        tracing::trace!("Greeting {:?}", person);
        channel.send(&Value::from(person.greeting()))?;
    }
}

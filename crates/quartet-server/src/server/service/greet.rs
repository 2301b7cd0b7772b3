//! Greeting service: one method per call shape.

use crate::server::call::{
    CallStream, Fold, Lifecycle, Method, Scan, Shape, bidi_streaming, client_streaming,
    server_streaming, unary,
};
use crate::server::config::ServerConfig;
use core::time::Duration;
use futures::{StreamExt, stream};
use quartet_core::Result;
use quartet_core::proto::greet::{
    GreetEveryoneRequest, GreetEveryoneResponse, GreetManyTimesRequest, GreetManyTimesResponse,
    GreetWithDeadlineRequest, GreetWithDeadlineResponse, Greeting, GreetingRequest,
    GreetingResponse, LongGreetRequest, LongGreetResponse, greet_service_server::GreetService,
};
use std::sync::Arc;
use tonic::{Request, Response, Status, Streaming};

const SERVICE: &str = "greet.GreetService";

static GREET: Method = Method::new(SERVICE, "Greet", Shape::Unary);
static GREET_WITH_DEADLINE: Method = Method::new(SERVICE, "GreetWithDeadline", Shape::Unary);
static GREET_MANY_TIMES: Method = Method::new(SERVICE, "GreetManyTimes", Shape::ServerStream);
static LONG_GREET: Method = Method::new(SERVICE, "LongGreet", Shape::ClientStream);
static GREET_EVERYONE: Method = Method::new(SERVICE, "GreetEveryone", Shape::BidiStream);

#[derive(Clone, Debug)]
pub struct GreetingService {
    lifecycle: Arc<Lifecycle>,
    repeat: u32,
    interval: Duration,
    probes: u32,
    probe: Duration,
    buffer: usize,
}

impl GreetingService {
    pub fn new(lifecycle: Arc<Lifecycle>, config: &ServerConfig) -> Self {
        Self {
            lifecycle,
            repeat: config.greet_repeat,
            interval: config.greet_interval,
            probes: config.deadline_probes,
            probe: config.deadline_probe,
            buffer: config.stream_buffer_size,
        }
    }
}

fn first_name(greeting: Option<Greeting>) -> String {
    greeting.unwrap_or_default().first_name
}

/// Concatenates one greeting per inbound person.
#[derive(Debug, Default)]
struct LongGreeting(String);

impl Fold for LongGreeting {
    type Input = String;
    type Output = LongGreetResponse;

    fn absorb(&mut self, first_name: String) -> Result<()> {
        self.0.push_str(&format!(" Hello {first_name} ! "));
        Ok(())
    }

    fn finish(self) -> Result<LongGreetResponse> {
        Ok(LongGreetResponse { result: self.0 })
    }
}

/// Answers every inbound person right away.
#[derive(Debug, Default)]
struct GreetEach;

impl Scan for GreetEach {
    type Input = String;
    type Emit = String;

    fn absorb(&mut self, first_name: String) -> Result<Option<String>> {
        Ok(Some(format!(" Hello {first_name} !")))
    }
}

#[tonic::async_trait]
impl GreetService for GreetingService {
    type GreetManyTimesStream = CallStream<GreetManyTimesResponse>;
    type GreetEveryoneStream = CallStream<GreetEveryoneResponse>;

    async fn greet(
        &self,
        request: Request<GreetingRequest>,
    ) -> Result<Response<GreetingResponse>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let name = first_name(request.into_inner().greeting);
        unary(ctx, &GREET, async move {
            Ok(GreetingResponse {
                result: format!("Hello {name}"),
            })
        })
        .await
    }

    /// Takes `probes` intervals to answer, giving up at the first one that
    /// starts after the deadline.
    async fn greet_with_deadline(
        &self,
        request: Request<GreetWithDeadlineRequest>,
    ) -> Result<Response<GreetWithDeadlineResponse>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let name = first_name(request.into_inner().greeting);
        let (probes, probe) = (self.probes, self.probe);

        let work_ctx = ctx.clone();
        unary(ctx, &GREET_WITH_DEADLINE, async move {
            for _ in 0..probes {
                work_ctx.check()?;
                work_ctx.sleep(probe).await?;
            }
            Ok(GreetWithDeadlineResponse {
                result: format!("Hello {name} !"),
            })
        })
        .await
    }

    async fn greet_many_times(
        &self,
        request: Request<GreetManyTimesRequest>,
    ) -> Result<Response<Self::GreetManyTimesStream>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let name = first_name(request.into_inner().greeting);
        let interval = self.interval;

        let greetings = stream::iter(0..self.repeat).then(move |i| {
            let result = format!("Hello {name} number : {i}");
            async move {
                if i > 0 {
                    tokio::time::sleep(interval).await;
                }
                Ok(GreetManyTimesResponse { result })
            }
        });
        Ok(server_streaming(ctx, &GREET_MANY_TIMES, greetings, self.buffer))
    }

    async fn long_greet(
        &self,
        request: Request<Streaming<LongGreetRequest>>,
    ) -> Result<Response<LongGreetResponse>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let names = request
            .into_inner()
            .map(|req| req.map(|req| first_name(req.greeting)));
        client_streaming(ctx, &LONG_GREET, names, LongGreeting::default()).await
    }

    async fn greet_everyone(
        &self,
        request: Request<Streaming<GreetEveryoneRequest>>,
    ) -> Result<Response<Self::GreetEveryoneStream>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let names = request
            .into_inner()
            .map(|req| req.map(|req| first_name(req.greeting)));
        Ok(bidi_streaming(
            ctx,
            &GREET_EVERYONE,
            names,
            GreetEach,
            |result| GreetEveryoneResponse { result },
            self.buffer,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::call::StreamSession;

    #[test]
    fn long_greeting_concatenates_in_arrival_order() {
        let mut session = StreamSession::new(LongGreeting::default());
        session.absorb("Ada".to_string()).unwrap();
        session.absorb("Linus".to_string()).unwrap();
        session.half_close_recv();
        assert_eq!(
            session.finish().unwrap().result,
            " Hello Ada !  Hello Linus ! "
        );
    }

    #[test]
    fn long_greeting_of_nobody_is_empty() {
        let mut session = StreamSession::new(LongGreeting::default());
        session.half_close_recv();
        assert_eq!(session.finish().unwrap().result, "");
    }

    #[test]
    fn everyone_gets_an_answer() {
        let mut session = StreamSession::new(GreetEach);
        assert_eq!(
            session.step("Grace".to_string()).unwrap().as_deref(),
            Some(" Hello Grace !")
        );
        assert_eq!(session.emitted(), 1);
    }

    #[test]
    fn missing_greeting_reads_as_an_empty_name() {
        assert_eq!(first_name(None), "");
    }

    fn paced_service(timeout: Duration) -> GreetingService {
        let config = ServerConfig {
            deadline_probes: 3,
            deadline_probe: Duration::from_millis(50),
            ..ServerConfig::default()
        };
        let lifecycle = Arc::new(Lifecycle::new(Some(timeout), Duration::from_secs(1)));
        GreetingService::new(lifecycle, &config)
    }

    fn ada() -> Request<GreetWithDeadlineRequest> {
        Request::new(GreetWithDeadlineRequest {
            greeting: Some(Greeting {
                first_name: "Ada".to_string(),
                ..Greeting::default()
            }),
        })
    }

    #[tokio::test]
    async fn greet_with_deadline_answers_within_the_deadline() {
        let service = paced_service(Duration::from_secs(5));
        let res = service.greet_with_deadline(ada()).await.unwrap();
        assert_eq!(res.into_inner().result, "Hello Ada !");
    }

    #[tokio::test]
    async fn greet_with_deadline_reports_deadline_exceeded() {
        let service = paced_service(Duration::from_millis(80));
        let status = service.greet_with_deadline(ada()).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
    }
}

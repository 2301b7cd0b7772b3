//! Arithmetic service.

use crate::server::call::{
    CallStream, Fold, Lifecycle, Method, Scan, Shape, bidi_streaming, client_streaming,
    server_streaming, unary,
};
use crate::server::config::ServerConfig;
use core::task::Poll;
use futures::{Stream, StreamExt, stream};
use quartet_core::proto::calculator::{
    ComputeAverageRequest, ComputeAverageResponse, FindMaximumRequest, FindMaximumResponse,
    PrimeNumberDecompositionRequest, PrimeNumberDecompositionResponse, SquareRootRequest,
    SquareRootResponse, SumRequest, SumResponse, calculator_service_server::CalculatorService,
};
use quartet_core::{Error, Result};
use std::sync::Arc;
use tonic::{Request, Response, Status, Streaming};

const SERVICE: &str = "calculator.CalculatorService";

static SUM: Method = Method::new(SERVICE, "Sum", Shape::Unary);
static PRIME_NUMBER_DECOMPOSITION: Method =
    Method::new(SERVICE, "PrimeNumberDecomposition", Shape::ServerStream);
static COMPUTE_AVERAGE: Method = Method::new(SERVICE, "ComputeAverage", Shape::ClientStream);
static FIND_MAXIMUM: Method = Method::new(SERVICE, "FindMaximum", Shape::BidiStream);
static SQUARE_ROOT: Method = Method::new(SERVICE, "SquareRoot", Shape::Unary);

/// Trial divisions performed per poll before the factor stream yields back to
/// the runtime.
const PRIME_STEP_BUDGET: u32 = 4096;

#[derive(Clone, Debug)]
pub struct ArithmeticService {
    lifecycle: Arc<Lifecycle>,
    buffer: usize,
}

impl ArithmeticService {
    pub fn new(lifecycle: Arc<Lifecycle>, config: &ServerConfig) -> Self {
        Self {
            lifecycle,
            buffer: config.stream_buffer_size,
        }
    }
}

/// Outcome of a bounded amount of factorization work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Factor(u64),
    /// Budget exhausted before the next factor was found.
    Pending,
    Done,
}

/// Prime factors of a positive number in ascending order, with
/// multiplicity. Found by trial division, one factor at a time.
#[derive(Clone, Debug)]
pub struct PrimeFactors {
    remaining: u64,
    divisor: u64,
}

impl PrimeFactors {
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `number` is below 1.
    pub fn new(number: i64) -> Result<Self> {
        let remaining = u64::try_from(number)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "Cannot decompose {number}: number must be at least 1"
                ))
            })?;
        Ok(Self {
            remaining,
            divisor: 2,
        })
    }

    /// Runs at most `budget` trial divisions.
    pub fn advance(&mut self, budget: u32) -> Step {
        for _ in 0..budget {
            if self.remaining == 1 {
                return Step::Done;
            }
            // divisor² > remaining: what is left is prime.
            if self.divisor > self.remaining / self.divisor {
                let prime = self.remaining;
                self.remaining = 1;
                return Step::Factor(prime);
            }
            if self.remaining % self.divisor == 0 {
                self.remaining /= self.divisor;
                return Step::Factor(self.divisor);
            }
            self.divisor += if self.divisor == 2 { 1 } else { 2 };
        }
        Step::Pending
    }
}

impl Iterator for PrimeFactors {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            match self.advance(u32::MAX) {
                Step::Factor(prime) => return Some(prime),
                Step::Done => return None,
                Step::Pending => {}
            }
        }
    }
}

/// Lazily streams the prime factors of `number`.
///
/// An invalid `number` becomes the stream's only item. Long runs of trial
/// division are split into slices of [`PRIME_STEP_BUDGET`] so the task yields
/// and the call can observe cancellation between them.
pub fn prime_factor_stream(number: i64) -> impl Stream<Item = Result<i64>> + Send + 'static {
    let mut state = Some(PrimeFactors::new(number));

    stream::poll_fn(move |cx| {
        let factors = match state.as_mut() {
            None => return Poll::Ready(None),
            Some(Ok(factors)) => factors,
            Some(Err(_)) => return Poll::Ready(state.take().and_then(Result::err).map(Err)),
        };

        match factors.advance(PRIME_STEP_BUDGET) {
            // Factors never exceed the (positive, i64) input.
            Step::Factor(prime) => Poll::Ready(Some(Ok(prime as i64))),
            Step::Done => {
                state = None;
                Poll::Ready(None)
            }
            Step::Pending => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    })
}

/// Mean of every number received.
#[derive(Debug, Default)]
pub struct Average {
    sum: i128,
    count: u64,
}

impl Fold for Average {
    type Input = i64;
    type Output = f64;

    fn absorb(&mut self, number: i64) -> Result<()> {
        self.sum += i128::from(number);
        self.count += 1;
        Ok(())
    }

    fn finish(self) -> Result<f64> {
        if self.count == 0 {
            return Err(Error::internal("Cannot compute the average of no numbers"));
        }
        Ok(self.sum as f64 / self.count as f64)
    }
}

/// Emits a number only when it is strictly greater than every number seen
/// before it.
#[derive(Debug, Default)]
pub struct RunningMaximum(Option<i32>);

impl Scan for RunningMaximum {
    type Input = i32;
    type Emit = i32;

    fn absorb(&mut self, number: i32) -> Result<Option<i32>> {
        if self.0.is_none_or(|max| number > max) {
            self.0 = Some(number);
            return Ok(Some(number));
        }
        Ok(None)
    }
}

/// # Errors
///
/// [`Error::InvalidArgument`] for negative numbers.
pub fn square_root(number: i32) -> Result<f64> {
    if number < 0 {
        return Err(Error::invalid_argument(format!(
            "Received negative number : {number}"
        )));
    }
    Ok(f64::from(number).sqrt())
}

#[tonic::async_trait]
impl CalculatorService for ArithmeticService {
    type PrimeNumberDecompositionStream = CallStream<PrimeNumberDecompositionResponse>;
    type FindMaximumStream = CallStream<FindMaximumResponse>;

    async fn sum(&self, request: Request<SumRequest>) -> Result<Response<SumResponse>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let SumRequest {
            first_number,
            second_number,
        } = request.into_inner();
        unary(ctx, &SUM, async move {
            Ok(SumResponse {
                sum_result: first_number.wrapping_add(second_number),
            })
        })
        .await
    }

    async fn prime_number_decomposition(
        &self,
        request: Request<PrimeNumberDecompositionRequest>,
    ) -> Result<Response<Self::PrimeNumberDecompositionStream>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let factors = prime_factor_stream(request.into_inner().number).map(|factor| {
            factor.map(|prime_factor| PrimeNumberDecompositionResponse { prime_factor })
        });
        Ok(server_streaming(
            ctx,
            &PRIME_NUMBER_DECOMPOSITION,
            factors,
            self.buffer,
        ))
    }

    async fn compute_average(
        &self,
        request: Request<Streaming<ComputeAverageRequest>>,
    ) -> Result<Response<ComputeAverageResponse>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let numbers = request.into_inner().map(|req| req.map(|req| req.number));
        let average = client_streaming(ctx, &COMPUTE_AVERAGE, numbers, Average::default()).await?;
        Ok(average.map(|average| ComputeAverageResponse { average }))
    }

    async fn find_maximum(
        &self,
        request: Request<Streaming<FindMaximumRequest>>,
    ) -> Result<Response<Self::FindMaximumStream>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let numbers = request.into_inner().map(|req| req.map(|req| req.number));
        Ok(bidi_streaming(
            ctx,
            &FIND_MAXIMUM,
            numbers,
            RunningMaximum::default(),
            |maximum| FindMaximumResponse { maximum },
            self.buffer,
        ))
    }

    async fn square_root(
        &self,
        request: Request<SquareRootRequest>,
    ) -> Result<Response<SquareRootResponse>, Status> {
        let ctx = self.lifecycle.open(&request)?;
        let number = request.into_inner().number;
        unary(ctx, &SQUARE_ROOT, async move {
            square_root(number).map(|number_root| SquareRootResponse { number_root })
        })
        .await
    }
}

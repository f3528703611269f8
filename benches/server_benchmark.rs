use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reactor_httpd::buffer::ByteBuffer;
use reactor_httpd::request::{ParseOutcome, RequestParser};
use reactor_httpd::timer::TimerHeap;
use std::io::Cursor;
use std::time::{Duration, Instant};

fn benchmark_buffer_read_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer");

    group.bench_function("fill_drain_small", |b| {
        let data = vec![0u8; 256];
        b.iter(|| {
            let mut buffer = ByteBuffer::new(1024);
            let mut cursor = Cursor::new(black_box(&data[..]));

            buffer.fill_from(&mut cursor).unwrap();
            let mut output = Vec::new();
            buffer.drain_to(&mut output).unwrap();

            assert_eq!(output.len(), data.len());
        })
    });

    group.bench_function("fill_overflow_scratch", |b| {
        let data = vec![0u8; 48 * 1024];
        b.iter(|| {
            let mut buffer = ByteBuffer::new(1024);
            let mut cursor = Cursor::new(black_box(&data[..]));

            buffer.fill_from(&mut cursor).unwrap();
            assert_eq!(buffer.readable_count(), data.len());
        })
    });

    group.bench_function("append_consume_compact", |b| {
        b.iter(|| {
            let mut buffer = ByteBuffer::new(512);
            for _ in 0..64 {
                buffer.append(black_box(&[1u8; 100]));
                buffer.consume(90);
            }
            black_box(buffer.readable_count())
        })
    });

    group.finish();
}

fn benchmark_http_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_parser");

    let simple_request = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let complex_request = b"POST /action/echo HTTP/1.1\r\n\
Host: localhost\r\n\
User-Agent: Mozilla/5.0\r\n\
Accept: */*\r\n\
Content-Type: application/json\r\n\
Content-Length: 27\r\n\
Connection: keep-alive\r\n\
\r\n\
{\"user\":\"a\",\"password\":\"b\"}\r\n";

    group.bench_function("parse_simple_request", |b| {
        b.iter(|| {
            let mut parser = RequestParser::new();
            let mut buffer = ByteBuffer::default();
            buffer.append(black_box(simple_request));
            assert_eq!(parser.parse(&mut buffer), ParseOutcome::Success);
        })
    });

    group.bench_function("parse_json_post", |b| {
        b.iter(|| {
            let mut parser = RequestParser::new();
            let mut buffer = ByteBuffer::default();
            buffer.append(black_box(complex_request));
            assert_eq!(parser.parse(&mut buffer), ParseOutcome::Success);
        })
    });

    group.bench_function("parse_in_16_byte_reads", |b| {
        b.iter(|| {
            let mut parser = RequestParser::new();
            let mut buffer = ByteBuffer::default();
            let mut outcome = ParseOutcome::Incomplete;
            for chunk in black_box(&complex_request[..]).chunks(16) {
                buffer.append(chunk);
                outcome = parser.parse(&mut buffer);
            }
            assert_eq!(outcome, ParseOutcome::Success);
        })
    });

    group.finish();
}

fn benchmark_timer_heap(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_heap");

    group.bench_function("schedule_adjust_fire_1k", |b| {
        b.iter(|| {
            let mut timers = TimerHeap::new();
            let base = Instant::now();
            for id in 0..1000u64 {
                timers.schedule_at(id, base + Duration::from_millis(id * 7 % 1000), || {});
            }
            for id in (0..1000u64).step_by(3) {
                timers.adjust(id, Duration::from_secs(5));
            }
            black_box(timers.fire_due(base + Duration::from_secs(1)))
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_buffer_read_write,
    benchmark_http_parsing,
    benchmark_timer_heap
);
criterion_main!(benches);

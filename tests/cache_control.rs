use http::header;
use http::HeaderMap;
use http_response_cache::CacheControlOptions;
use http_response_cache::ResponseCache;
use std::time::Duration;
use std::time::SystemTime;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

fn built(max_age: Duration, opts: &CacheControlOptions) -> ResponseCache {
    let mut cache = ResponseCache::new(&HeaderMap::new());
    cache.expires_in(max_age, opts, SystemTime::now());
    cache
}

fn cache_control(cache: &ResponseCache) -> &str {
    cache
        .headers()
        .get(header::CACHE_CONTROL)
        .unwrap()
        .to_str()
        .unwrap()
}

fn extra(pairs: &[(&str, Option<&str>)]) -> CacheControlOptions {
    CacheControlOptions {
        extra: pairs
            .iter()
            .map(|(k, v)| ((*k).into(), v.map(From::from)))
            .collect(),
        ..Default::default()
    }
}

#[test]
fn zero_means_no_cache() {
    let cache = built(Duration::ZERO, &Default::default());
    assert_eq!("no-cache, private", cache_control(&cache));
}

#[test]
fn zero_suppresses_the_expires_header() {
    let opts = CacheControlOptions {
        expires_header: true,
        ..Default::default()
    };
    let cache = built(Duration::ZERO, &opts);
    assert_eq!("no-cache, private", cache_control(&cache));
    assert!(cache.headers().get(header::EXPIRES).is_none());
}

#[test]
fn positive_lifetime_becomes_max_age() {
    let opts = CacheControlOptions {
        public: true,
        ..Default::default()
    };
    let cache = built(Duration::from_secs(3600), &opts);
    assert_eq!("max-age=3600, public", cache_control(&cache));
    assert!(cache.headers().get(header::EXPIRES).is_none());
}

#[test]
fn expires_header_is_the_http_date_of_now_plus_max_age() {
    let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let opts = CacheControlOptions {
        public: true,
        expires_header: true,
        ..Default::default()
    };
    let mut cache = ResponseCache::new(&HeaderMap::new());
    cache.expires_in(Duration::from_secs(3600), &opts, now);

    let expected = OffsetDateTime::from(now + Duration::from_secs(3600))
        .format(&Rfc2822)
        .unwrap();
    assert_eq!(
        expected,
        cache.headers().get(header::EXPIRES).unwrap().to_str().unwrap()
    );
    assert_eq!("max-age=3600, public", cache_control(&cache));
}

#[test]
fn valued_directives_pass_through_after_the_mandatory_two() {
    let cache = built(Duration::from_secs(60), &extra(&[("maxStale", Some("300"))]));
    assert_eq!("max-age=60, private, maxStale=300", cache_control(&cache));
}

#[test]
fn bare_directives_and_order_are_preserved() {
    let mut opts = extra(&[("immutable", None), ("stale-while-revalidate", Some("30"))]);
    opts.public = true;
    let cache = built(Duration::from_secs(60), &opts);
    assert_eq!(
        "max-age=60, public, immutable, stale-while-revalidate=30",
        cache_control(&cache)
    );
}

#[test]
fn extra_directives_apply_to_no_cache_too() {
    let cache = built(Duration::ZERO, &extra(&[("must-revalidate", None)]));
    assert_eq!("no-cache, private, must-revalidate", cache_control(&cache));
}

#[test]
fn rebuilding_replaces_the_previous_header() {
    let mut cache = ResponseCache::new(&HeaderMap::new());
    let now = SystemTime::now();
    cache.expires_in(Duration::from_secs(60), &Default::default(), now);
    cache.expires_in(Duration::ZERO, &Default::default(), now);

    let values: Vec<_> = cache.headers().get_all(header::CACHE_CONTROL).iter().collect();
    assert_eq!(1, values.len());
    assert_eq!("no-cache, private", cache_control(&cache));
}

#[test]
fn only_caching_headers_are_touched() {
    let opts = CacheControlOptions {
        expires_header: true,
        ..Default::default()
    };
    let cache = built(Duration::from_secs(60), &opts);
    assert_eq!(2, cache.headers().len());
}

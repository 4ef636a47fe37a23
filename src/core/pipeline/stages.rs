//! Stage implementations for `matchBatch` (§4.6).

use super::model::*;
use super::Services;
use crate::core::detect;
use crate::core::features::{self, FeatureSet};
use crate::core::imgio::FastResizer;
use crate::core::matcher;
use crate::core::progress::ProgressReporter;
use crate::error::PipelineError;
use crate::events::Stage;
use image::GenericImageView;
use rayon::prelude::*;
use std::time::Instant;

const MAX_SIFT_FEATURES: usize = 1000;
const MAX_ORB_FEATURES: usize = 1000;

pub fn run(
    session_id: &str,
    query_images: Vec<QueryImage>,
    candidate_covers: Vec<CandidateCover>,
    services: &Services,
    reporter: &ProgressReporter,
) -> Result<SessionResult, PipelineError> {
    // --- Stage 1: processing_data (12 -> 20%) ---
    reporter.update(Stage::ProcessingData, 12.0, "flattening candidate covers");
    if candidate_covers.is_empty() {
        return Err(PipelineError::EmptyCandidates);
    }
    let unique_urls = flatten_candidate_urls(&candidate_covers);
    let url_to_cover = build_url_cover_map(&candidate_covers);
    reporter.update(Stage::ProcessingData, 20.0, "candidate covers flattened");

    // --- Stage 2: initializing_matcher (20 -> 25%) ---
    reporter.update(Stage::InitializingMatcher, 22.0, "initializing matcher");
    let workers = services.config.max_workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| PipelineError::Unexpected {
            stage: "initializing_matcher".to_string(),
            reason: e.to_string(),
        })?;
    reporter.update(Stage::InitializingMatcher, 25.0, "matcher ready");

    // --- Stage 3: extracting_features (query images, 25 -> 35%) ---
    let n_queries = query_images.len().max(1);
    let mut query_features: Vec<Option<FeatureSet>> = Vec::with_capacity(query_images.len());
    for (qi, query) in query_images.iter().enumerate() {
        let band = 25.0 + (qi + 1) as f64 / n_queries as f64 * 10.0;
        reporter.update(
            Stage::ExtractingFeatures,
            band,
            format!("Image {}/{}: extracting query features", qi + 1, query_images.len()),
        );
        query_features.push(extract_query_features(query));
    }

    // --- Stage 4: comparing_images (35 -> 85%), split into N sub-bands ---
    let mut queries: Vec<QueryResult> = Vec::with_capacity(query_images.len());
    for (qi, features) in query_features.iter().enumerate() {
        let band_start = 35.0 + qi as f64 * 50.0 / n_queries as f64;
        let band_end = 35.0 + (qi + 1) as f64 * 50.0 / n_queries as f64;

        let Some(query_set) = features else {
            queries.push(QueryResult {
                matches: vec![],
                total_matches: 0,
                error: Some("query image could not be decoded or yielded no features".to_string()),
            });
            continue;
        };

        let total = unique_urls.len().max(1);
        let outcomes: Vec<RankedResult> = pool.install(|| {
            unique_urls
                .par_iter()
                .map(|url| process_candidate(url, query_set, services))
                .collect()
        });

        let mut matches = Vec::with_capacity(outcomes.len());
        for (idx, mut outcome) in outcomes.into_iter().enumerate() {
            let progress = band_start + (idx + 1) as f64 / total as f64 * (band_end - band_start);
            reporter.update(
                Stage::ComparingImages,
                progress,
                format!("candidate {}/{}", idx + 1, unique_urls.len()),
            );
            outcome.cover_metadata = url_to_cover.get(&unique_urls[idx]).cloned();
            matches.push(outcome);
        }

        queries.push(QueryResult {
            total_matches: matches.len(),
            matches,
            error: None,
        });
    }

    // --- Stage 5: processing_results (85 -> 95%) ---
    reporter.update(Stage::ProcessingResults, 88.0, "sorting results by similarity");
    for query in &mut queries {
        // Stable sort: ties preserve input order (§5 "Ordering guarantees").
        query
            .matches
            .sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
    }
    reporter.update(Stage::ProcessingResults, 95.0, "results ranked");

    // --- Stage 6: finalizing (95 -> 100%) ---
    let result_batch = services.config.result_batch.max(1);
    for query in &mut queries {
        query.matches.truncate(result_batch);
    }
    reporter.update(Stage::Finalizing, 97.0, "truncating to top matches");

    let summary = build_summary(&queries, &candidate_covers, &unique_urls);
    let result = SessionResult {
        session_id: session_id.to_string(),
        queries,
        summary,
    };
    reporter.update(Stage::Finalizing, 100.0, "session finalized");

    Ok(result)
}

fn extract_query_features(query: &QueryImage) -> Option<FeatureSet> {
    let image = crate::core::imgio::decode_bytes(&query.bytes).ok()?;
    let (cropped, _was_cropped) = detect::detect_and_crop(&image).ok()?;
    let mut resizer = FastResizer::new();
    let feature_set = features::extract(&cropped, &mut resizer, MAX_SIFT_FEATURES, MAX_ORB_FEATURES).ok()?;
    if feature_set.is_empty() {
        None
    } else {
        Some(feature_set)
    }
}

fn process_candidate(url: &str, query: &FeatureSet, services: &Services) -> RankedResult {
    let resolved = resolve_candidate_features(url, services);

    let Some(candidate) = resolved else {
        return RankedResult {
            url: url.to_string(),
            similarity: 0.0,
            status: ResultStatus::FailedDownload,
            match_details: MatchDetails::default(),
            candidate_feature_counts: CandidateFeatureCounts::default(),
            cover_metadata: None,
        };
    };

    if candidate.is_empty() {
        return RankedResult {
            url: url.to_string(),
            similarity: 0.0,
            status: ResultStatus::FailedFeatures,
            match_details: MatchDetails::default(),
            candidate_feature_counts: CandidateFeatureCounts {
                sift: candidate.sift.count(),
                orb: candidate.orb.count(),
            },
            cover_metadata: None,
        };
    }

    let result = matcher::match_features(&query.sift, &query.orb, &candidate.sift, &candidate.orb);
    RankedResult {
        url: url.to_string(),
        similarity: result.overall_similarity as f64,
        status: ResultStatus::Success,
        match_details: MatchDetails {
            sift: result.sift,
            orb: result.orb,
        },
        candidate_feature_counts: CandidateFeatureCounts {
            sift: candidate.sift.count(),
            orb: candidate.orb.count(),
        },
        cover_metadata: None,
    }
}

/// Feature-cache lookup → on miss, fetch, detect, extract, store (§4.6
/// `comparing_images`). Returns `None` only when the download itself
/// failed; an extraction failure still yields a (possibly empty)
/// `FeatureSet` so the caller can distinguish `failed_download` from
/// `failed_features`.
fn resolve_candidate_features(url: &str, services: &Services) -> Option<FeatureSet> {
    if let Ok(Some(record)) = services.cache.get_features(url) {
        return Some(record.features);
    }

    let (image, _bytes) = services.fetcher.fetch_one(services.cache.as_ref(), url).ok()?;
    let started = Instant::now();
    let (cropped, was_cropped) = detect::detect_and_crop(&image).unwrap_or_else(|_| (image.clone(), false));
    let mut resizer = FastResizer::new();
    let feature_set = features::extract(&cropped, &mut resizer, MAX_SIFT_FEATURES, MAX_ORB_FEATURES)
        .unwrap_or_default();
    let elapsed = started.elapsed().as_secs_f64();
    let shape = cropped.dimensions();
    let _ = services.cache.put_features(url, &feature_set, elapsed, shape, was_cropped);
    Some(feature_set)
}

fn flatten_candidate_urls(covers: &[CandidateCover]) -> Vec<String> {
    let mut seen = Vec::new();
    for cover in covers {
        for url in &cover.urls {
            if !seen.contains(url) {
                seen.push(url.clone());
            }
        }
    }
    seen
}

fn build_url_cover_map(covers: &[CandidateCover]) -> std::collections::HashMap<String, CoverMetadata> {
    let mut map = std::collections::HashMap::new();
    for cover in covers {
        let metadata = CoverMetadata {
            name: cover.name.clone(),
            issue_number: cover.issue_number.clone(),
            comic_vine_id: cover.comic_vine_id,
            parent_comic_vine_id: cover.parent_comic_vine_id,
        };
        for url in &cover.urls {
            map.entry(url.clone()).or_insert_with(|| metadata.clone());
        }
    }
    map
}

fn build_summary(queries: &[QueryResult], covers: &[CandidateCover], unique_urls: &[String]) -> SessionSummary {
    let successful_images = queries.iter().filter(|q| q.error.is_none() && !q.matches.is_empty()).count() as u64;
    let failed_images = queries.len() as u64 - successful_images;
    let total_matches_all_images = queries.iter().map(|q| q.total_matches as u64).sum();

    SessionSummary {
        total_images_processed: queries.len() as u64,
        successful_images,
        failed_images,
        total_matches_all_images,
        total_covers_processed: covers.len() as u64,
        total_urls_processed: unique_urls.len() as u64,
    }
}

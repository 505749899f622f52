//! JavaScript injected into every new document.
//!
//! Two pieces: a compact readability extractor producing the snapshot
//! shape, and the reporter that bridges parse events to the host through
//! the `reportSnapshot` CDP binding.

/// Name of the `Runtime.addBinding` hook the reporter calls
pub const SNAPSHOT_BINDING: &str = "reportSnapshot";

/// Runs in every new document before any page script.
///
/// Defines `window.__pagereader.extract()` (also used by the host for the
/// final post-settle parse) and wires the reporting events:
/// `readystatechange` and `load` report immediately when the parse is
/// non-empty; an empty parse is reported on a 500 ms debounce instead so
/// slow-rendering pages still produce progress.
pub const INIT_SCRIPT: &str = r#"
(() => {
    if (window.__pagereader) return;

    // Containers that never hold article text
    const DISCARD = /^(script|style|noscript|template|iframe|svg|nav|footer|aside|form|button)$/i;
    const CANDIDATE = /article|main|content|post|entry|body|text|story/i;
    const NEGATIVE = /comment|sidebar|share|social|menu|banner|advert|promo|related|widget/i;

    const scoreNode = (node) => {
        let score = 0;
        const paragraphs = node.getElementsByTagName('p');
        for (const p of paragraphs) {
            const len = p.textContent.trim().length;
            if (len > 25) score += 1 + Math.min(Math.floor(len / 100), 3);
        }
        const hint = (node.className || '') + ' ' + (node.id || '');
        if (CANDIDATE.test(hint)) score += 5;
        if (NEGATIVE.test(hint)) score -= 10;
        if (node.tagName === 'ARTICLE' || node.tagName === 'MAIN') score += 10;
        return score;
    };

    const findArticle = () => {
        const candidates = document.querySelectorAll(
            'article, main, [role="main"], div, section'
        );
        let best = null;
        let bestScore = 0;
        for (const node of candidates) {
            if (DISCARD.test(node.tagName)) continue;
            const score = scoreNode(node);
            if (score > bestScore) {
                best = node;
                bestScore = score;
            }
        }
        // A handful of scored paragraphs is the floor for a usable article
        return bestScore >= 8 ? best : null;
    };

    const publishedTime = () => {
        const meta = document.querySelector(
            'meta[property="article:published_time"], meta[name="publishedDate"], meta[itemprop="datePublished"]'
        );
        if (meta) return meta.getAttribute('content');
        const time = document.querySelector('time[datetime]');
        return time ? time.getAttribute('datetime') : null;
    };

    const extract = () => {
        const article = findArticle();
        return {
            href: document.location.href,
            title: document.title || '',
            content: article ? article.innerHTML : null,
            textContent: article
                ? article.textContent
                : (document.body ? document.body.textContent : ''),
            html: document.documentElement ? document.documentElement.outerHTML : '',
            publishedTime: publishedTime()
        };
    };

    let debounceTimer = null;
    const report = () => {
        if (typeof window.reportSnapshot !== 'function') return;
        const snapshot = extract();
        if (snapshot.content) {
            if (debounceTimer) { clearTimeout(debounceTimer); debounceTimer = null; }
            window.reportSnapshot(JSON.stringify(snapshot));
        } else {
            // Empty parse: hold off in case the page is mid-render
            if (debounceTimer) clearTimeout(debounceTimer);
            debounceTimer = setTimeout(() => {
                debounceTimer = null;
                window.reportSnapshot(JSON.stringify(extract()));
            }, 500);
        }
    };

    document.addEventListener('readystatechange', report);
    window.addEventListener('load', report);

    window.__pagereader = { extract };
})();
"#;

/// Evaluated by the host after navigation settles for the final parse
pub const EXTRACT_SCRIPT: &str = r#"
(() => {
    if (window.__pagereader) return window.__pagereader.extract();
    return {
        href: document.location.href,
        title: document.title || '',
        content: null,
        textContent: document.body ? document.body.textContent : '',
        html: document.documentElement ? document.documentElement.outerHTML : '',
        publishedTime: null
    };
})()
"#;
